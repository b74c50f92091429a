//! Module-scoped read-only data pool: interns string and float literals,
//! producing stable `.LC_str_N` / `.LC_f64_N` labels.
//!
//! Grounded on `original_source/src/codegen/x86_64/AsmEmitter.hpp`'s
//! `RoDataPool` nested class: two de-duplicating tables, one hashed by byte
//! content and one by bit pattern (so `+0.0` and `-0.0` stay distinct
//! entries, since they compare equal as `f64` but are different bit
//! patterns callers may care about).

use std::collections::HashMap;

/// De-duplicating pool of `.rodata` literals, threaded mutably through the
/// pipeline for the duration of a module's emission. Not shared across
/// threads; owned by the backend facade (`crate::emit_module`).
#[derive(Debug, Default)]
pub struct RoDataPool {
    string_literals: Vec<Vec<u8>>,
    string_lookup: HashMap<Vec<u8>, usize>,
    f64_literals: Vec<f64>,
    f64_lookup: HashMap<u64, usize>,
}

impl RoDataPool {
    /// Construct an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a byte-string literal, returning its dense index. Repeated
    /// calls with identical bytes return the same index.
    pub fn add_string(&mut self, bytes: impl Into<Vec<u8>>) -> usize {
        let bytes = bytes.into();
        if let Some(&idx) = self.string_lookup.get(&bytes) {
            return idx;
        }
        let idx = self.string_literals.len();
        self.string_lookup.insert(bytes.clone(), idx);
        self.string_literals.push(bytes);
        idx
    }

    /// Intern a 64-bit float literal, returning its dense index. Hashed by
    /// bit pattern rather than by `PartialEq` so `+0.0` and `-0.0` remain
    /// distinct entries.
    pub fn add_f64(&mut self, value: f64) -> usize {
        let bits = value.to_bits();
        if let Some(&idx) = self.f64_lookup.get(&bits) {
            return idx;
        }
        let idx = self.f64_literals.len();
        self.f64_lookup.insert(bits, idx);
        self.f64_literals.push(value);
        idx
    }

    /// Canonical label for a previously interned string literal.
    pub fn string_label(&self, index: usize) -> String {
        format!(".LC_str_{}", index)
    }

    /// Byte length of a previously interned string literal.
    pub fn string_len(&self, index: usize) -> usize {
        self.string_literals[index].len()
    }

    /// Canonical label for a previously interned float literal.
    pub fn f64_label(&self, index: usize) -> String {
        format!(".LC_f64_{}", index)
    }

    /// True when no literals have been interned yet.
    pub fn is_empty(&self) -> bool {
        self.string_literals.is_empty() && self.f64_literals.is_empty()
    }

    /// Render the `.rodata` section for every interned literal: string
    /// literals first (in intern order), then aligned float literals.
    pub fn emit(&self) -> String {
        let mut out = String::new();
        if self.is_empty() {
            return out;
        }
        out.push_str(".section .rodata\n");
        for (idx, bytes) in self.string_literals.iter().enumerate() {
            out.push_str(&format!("{}:\n", self.string_label(idx)));
            emit_bytes(&mut out, bytes);
        }
        if !self.f64_literals.is_empty() {
            out.push_str(".p2align 3\n");
            for (idx, value) in self.f64_literals.iter().enumerate() {
                out.push_str(&format!("{}:\n", self.f64_label(idx)));
                out.push_str(&format!("    .quad 0x{:016x}\n", value.to_bits()));
            }
        }
        out
    }
}

/// Emit a byte string as `.ascii` runs for printable spans and `.byte`
/// lines (up to 16 bytes each) for everything else, matching
/// `AsmEmitter::RoDataPool::emit`'s described behaviour.
fn emit_bytes(out: &mut String, bytes: &[u8]) {
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_graphic() || bytes[i] == b' ' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_graphic() || bytes[i] == b' ') {
                i += 1;
            }
            let run = &bytes[start..i];
            out.push_str("    .ascii \"");
            for &b in run {
                match b {
                    b'"' => out.push_str("\\\""),
                    b'\\' => out.push_str("\\\\"),
                    _ => out.push(b as char),
                }
            }
            out.push_str("\"\n");
        } else {
            let start = i;
            let end = (start + 16).min(bytes.len());
            out.push_str("    .byte ");
            let chunk: Vec<String> = bytes[start..end].iter().map(|b| format!("{}", b)).collect();
            out.push_str(&chunk.join(", "));
            out.push('\n');
            i = end;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_identical_strings() {
        let mut pool = RoDataPool::new();
        let a = pool.add_string(b"hello".to_vec());
        let b = pool.add_string(b"hello".to_vec());
        assert_eq!(a, b);
        assert_eq!(pool.string_label(a), ".LC_str_0");
    }

    #[test]
    fn positive_and_negative_zero_are_distinct() {
        let mut pool = RoDataPool::new();
        let pos = pool.add_f64(0.0);
        let neg = pool.add_f64(-0.0);
        assert_ne!(pos, neg);
    }

    #[test]
    fn emits_ascii_for_printable_literal() {
        let mut pool = RoDataPool::new();
        pool.add_string(b"Hello, world!".to_vec());
        let out = pool.emit();
        assert!(out.contains(".LC_str_0:"));
        assert!(out.contains(".ascii \"Hello, world!\""));
    }
}
