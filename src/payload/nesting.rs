//! Opcode walk over a pickle that measures container nesting without
//! building any value.
//!
//! The decoder only sees the stream after this check passes, so a row with
//! thousands of nested lists cannot exhaust the stack of a request worker.

use std::collections::HashMap;

/// Deepest container nesting of the value `bytes` would build, counting a
/// scalar as 0 and a container of scalars as 1. `None` when the stream is
/// truncated, unbalanced or uses an unknown opcode.
pub(super) fn pickle_depth(bytes: &[u8]) -> Option<usize> {
    let mut ops = Ops { bytes, pos: 0 };
    let mut stack: Vec<usize> = Vec::new();
    let mut marks: Vec<usize> = Vec::new();
    let mut memo: HashMap<u64, usize> = HashMap::new();
    let mut deepest = 0;

    loop {
        let op = ops.byte()?;
        match op {
            b'.' => return Some(deepest),

            // no stack effect
            0x80 => {
                ops.take(1)?;
            }
            0x95 => {
                ops.take(8)?;
            }
            0x98 => {}

            // scalars
            b'N' | 0x88 | 0x89 | 0x97 => stack.push(0),
            b'I' | b'L' | b'F' | b'S' | b'V' | b'P' => {
                ops.line()?;
                stack.push(0);
            }
            b'K' | 0x82 => {
                ops.take(1)?;
                stack.push(0);
            }
            b'M' | 0x83 => {
                ops.take(2)?;
                stack.push(0);
            }
            b'J' | 0x84 => {
                ops.take(4)?;
                stack.push(0);
            }
            b'G' => {
                ops.take(8)?;
                stack.push(0);
            }
            b'U' | b'C' | 0x8a | 0x8c => {
                ops.sized(1)?;
                stack.push(0);
            }
            b'T' | b'X' | b'B' | 0x8b => {
                ops.sized(4)?;
                stack.push(0);
            }
            0x8d | 0x8e | 0x96 => {
                ops.sized(8)?;
                stack.push(0);
            }
            b'c' => {
                ops.line()?;
                ops.line()?;
                stack.push(0);
            }
            0x93 => {
                pop_n(&mut stack, 2)?;
                stack.push(0);
            }
            b'Q' => {
                let id = stack.pop()?;
                stack.push(id);
            }

            // empty containers
            b']' | b')' | b'}' | 0x8f => stack.push(1),
            b'(' => marks.push(stack.len()),

            // fill the container below
            b'a' => {
                let item = stack.pop()?;
                nest_into(&mut stack, item)?;
            }
            b's' => {
                let items = pop_n(&mut stack, 2)?;
                nest_into(&mut stack, items)?;
            }
            b'b' => {
                let state = stack.pop()?;
                nest_into(&mut stack, state)?;
            }
            b'e' | b'u' | 0x90 => {
                let items = pop_mark(&mut stack, &mut marks)?;
                nest_into(&mut stack, items)?;
            }

            // build a new container
            b'l' | b't' | b'd' | b'o' | 0x91 => {
                let items = pop_mark(&mut stack, &mut marks)?;
                stack.push(items + 1);
            }
            b'i' => {
                ops.line()?;
                ops.line()?;
                let items = pop_mark(&mut stack, &mut marks)?;
                stack.push(items + 1);
            }
            0x85 | 0x86 | 0x87 => {
                let items = pop_n(&mut stack, usize::from(op - 0x84))?;
                stack.push(items + 1);
            }
            b'R' | 0x81 => {
                let items = pop_n(&mut stack, 2)?;
                stack.push(items + 1);
            }
            0x92 => {
                let items = pop_n(&mut stack, 3)?;
                stack.push(items + 1);
            }

            // stack manipulation
            b'0' => {
                if marks.last() == Some(&stack.len()) {
                    marks.pop();
                } else {
                    stack.pop()?;
                }
            }
            b'1' => {
                pop_mark(&mut stack, &mut marks)?;
            }
            b'2' => stack.push(*stack.last()?),

            // memo
            b'p' => {
                let key = ops.decimal_line()?;
                memo.insert(key, *stack.last()?);
            }
            b'q' => {
                let key = ops.uint(1)?;
                memo.insert(key, *stack.last()?);
            }
            b'r' => {
                let key = ops.uint(4)?;
                memo.insert(key, *stack.last()?);
            }
            0x94 => {
                let key = memo.len() as u64;
                memo.insert(key, *stack.last()?);
            }
            b'g' => {
                let key = ops.decimal_line()?;
                stack.push(*memo.get(&key)?);
            }
            b'h' => {
                let key = ops.uint(1)?;
                stack.push(*memo.get(&key)?);
            }
            b'j' => {
                let key = ops.uint(4)?;
                stack.push(*memo.get(&key)?);
            }

            _ => return None,
        }
        if let Some(&top) = stack.last() {
            deepest = deepest.max(top);
        }
    }
}

/// Record `child` as nested inside the container on top of the stack.
fn nest_into(stack: &mut [usize], child: usize) -> Option<()> {
    let top = stack.last_mut()?;
    *top = (*top).max(child + 1);
    Some(())
}

/// Pop `n` entries, returning the deepest.
fn pop_n(stack: &mut Vec<usize>, n: usize) -> Option<usize> {
    let start = stack.len().checked_sub(n)?;
    Some(stack.drain(start..).max().unwrap_or(0))
}

/// Pop everything above the last mark, returning the deepest.
fn pop_mark(stack: &mut Vec<usize>, marks: &mut Vec<usize>) -> Option<usize> {
    let mark = marks.pop()?;
    if mark > stack.len() {
        return None;
    }
    Some(stack.drain(mark..).max().unwrap_or(0))
}

struct Ops<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Ops<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let chunk = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(chunk)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    /// Little-endian unsigned integer of `width` bytes.
    fn uint(&mut self, width: usize) -> Option<u64> {
        let chunk = self.take(width)?;
        Some(chunk.iter().rev().fold(0, |acc, &b| (acc << 8) | u64::from(b)))
    }

    /// Skip a length-prefixed argument whose length takes `width` bytes.
    fn sized(&mut self, width: usize) -> Option<()> {
        let len = usize::try_from(self.uint(width)?).ok()?;
        self.take(len).map(|_| ())
    }

    /// Newline-terminated argument, without the newline.
    fn line(&mut self) -> Option<&'a [u8]> {
        let rest = self.bytes.get(self.pos..)?;
        let len = rest.iter().position(|&b| b == b'\n')?;
        self.pos += len + 1;
        Some(&rest[..len])
    }

    fn decimal_line(&mut self) -> Option<u64> {
        std::str::from_utf8(self.line()?).ok()?.trim().parse().ok()
    }
}
