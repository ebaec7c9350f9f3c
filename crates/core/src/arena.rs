//! Compilation-job arena
//!
//! Every token, AST node, diagnostic-carried string, and IR node allocated
//! during a single compilation job is carved out of one `Arena`. The arena is
//! created when a job starts and dropped when the job ends (or is abandoned
//! on an error path); there is no reset-and-reuse — each job gets its own.
//!
//! This is a thin wrapper over [`bumpalo::Bump`] rather than a direct
//! dependency on bumpalo throughout the compiler, so the rest of the pipeline
//! names one type (`Arena`) instead of reaching into a third-party crate at
//! every allocation site.

use bumpalo::Bump;
use bumpalo::collections::Vec as BumpVec;

/// Scoped bump allocator backing a single compilation job.
///
/// `Arena` borrows nothing and owns its backing pages; all allocations it
/// hands out are tied to `&self`, so the arena itself must outlive every
/// token, AST node, and IR node produced against it. Dropping the arena
/// releases every allocation it ever made in one shot.
pub struct Arena {
    bump: Bump,
}

impl Arena {
    /// Start a new, empty arena for one compilation job.
    pub fn new() -> Self {
        Arena { bump: Bump::new() }
    }

    /// Allocate a single value, returning a reference with the arena's
    /// lifetime.
    pub fn alloc<T>(&self, value: T) -> &T {
        self.bump.alloc(value)
    }

    /// Allocate and initialize a growable vector backed by the arena.
    pub fn alloc_vec<T>(&self) -> BumpVec<'_, T> {
        BumpVec::new_in(&self.bump)
    }

    /// Copy a string slice into the arena, returning a borrowing window with
    /// the arena's lifetime. Used for lexeme slices that must outlive the
    /// original source buffer's borrow scope (e.g. escape-expanded strings).
    pub fn alloc_str<'a>(&'a self, s: &str) -> &'a str {
        self.bump.alloc_str(s)
    }

    /// Total bytes currently allocated from the underlying pages. Exposed
    /// for `-v` per-stage statistics, not for any correctness decision.
    pub fn allocated_bytes(&self) -> usize {
        self.bump.allocated_bytes()
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_stable_reference() {
        let arena = Arena::new();
        let a = arena.alloc(42i64);
        let b = arena.alloc(43i64);
        assert_eq!(*a, 42);
        assert_eq!(*b, 43);
    }

    #[test]
    fn alloc_str_copies_into_arena() {
        let arena = Arena::new();
        let source = String::from("hello");
        let copied = arena.alloc_str(&source);
        drop(source);
        assert_eq!(copied, "hello");
    }

    #[test]
    fn alloc_vec_grows_in_arena() {
        let arena = Arena::new();
        let mut v = arena.alloc_vec::<i32>();
        v.push(1);
        v.push(2);
        v.push(3);
        assert_eq!(v.as_slice(), &[1, 2, 3]);
    }
}
