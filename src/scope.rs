//! Lexical scope stacks (§3.4). The same frame/declaration shape backs four
//! parallel stacks used elsewhere in the crate: type bindings, value types
//! (during checking), runtime values (during evaluation), and loop labels.
//! Rather than four bespoke structs this is one generic `Scope<V>`, mirroring
//! how the tokenizer/parser share the single `PeekableBuffer` trait instead
//! of each growing their own lookahead type.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::common::multiphase::Identifier;

/// A single binding: its value, whether it may be reassigned, and whether a
/// nested frame may shadow it with a binding of the same name.
#[derive(Clone, Debug)]
pub struct Declaration<V> {
    pub mutable: bool,
    pub allow_shadow: bool,
    pub value: V,
}

impl<V> Declaration<V> {
    pub fn new(mutable: bool, allow_shadow: bool, value: V) -> Self {
        Self {
            mutable,
            allow_shadow,
            value,
        }
    }
}

type Frame<V> = HashMap<Identifier, Declaration<V>>;

/// A stack of frames: the permanent global frame plus zero or more local
/// frames above it. The global frame is `Rc<RefCell<_>>` rather than a plain
/// element of the stack so that [`Scope::capture`] can share it by reference
/// (§3.4: a closure's reassignment of a global is visible to the defining
/// scope and vice versa) while still deep-cloning everything else.
#[derive(Debug)]
pub struct Scope<V> {
    global: Rc<RefCell<Frame<V>>>,
    locals: Vec<Frame<V>>,
}

/// A true deep copy, global frame included: used by [`Scope::snapshot`] to
/// take a restore point that later mutation of the live scope cannot affect
/// (§4.6's transactional REPL check). Contrast with [`Scope::capture`].
impl<V: Clone> Clone for Scope<V> {
    fn clone(&self) -> Self {
        Self {
            global: Rc::new(RefCell::new(self.global.borrow().clone())),
            locals: self.locals.clone(),
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum DeclareError {
    /// A non-shadowable binding of the same name is already visible.
    AlreadyBound,
}

#[derive(Debug, Eq, PartialEq)]
pub enum AssignError {
    /// No binding of that name is visible at all.
    NotFound,
    /// A binding exists but is not mutable.
    NotMutable,
}

impl<V: Clone> Scope<V> {
    pub fn new() -> Self {
        Self {
            global: Rc::new(RefCell::new(Frame::new())),
            locals: Vec::new(),
        }
    }

    pub fn push_frame(&mut self) {
        self.locals.push(Frame::new());
    }

    /// Panics if called with no local frame open; callers always pair this
    /// with a prior `push_frame`, matching the evaluator's and checker's
    /// "open scope / drop scope on every exit path" discipline (§5).
    pub fn pop_frame(&mut self) {
        assert!(!self.locals.is_empty(), "cannot pop the global frame");
        self.locals.pop();
    }

    /// Declares `name` in the top frame. Fails if a non-shadowable binding
    /// of that name is visible in any frame (§3.4).
    pub fn declare(
        &mut self,
        name: Identifier,
        mutable: bool,
        allow_shadow: bool,
        value: V,
    ) -> Result<(), DeclareError> {
        let shadowing_forbidden = self
            .locals
            .iter()
            .any(|frame| frame.get(&name).map_or(false, |existing| !existing.allow_shadow))
            || self
                .global
                .borrow()
                .get(&name)
                .map_or(false, |existing| !existing.allow_shadow);
        if shadowing_forbidden {
            return Err(DeclareError::AlreadyBound);
        }
        let declaration = Declaration::new(mutable, allow_shadow, value);
        match self.locals.last_mut() {
            Some(top) => {
                top.insert(name, declaration);
            }
            None => {
                self.global.borrow_mut().insert(name, declaration);
            }
        }
        Ok(())
    }

    /// Top-down lookup: innermost frame wins.
    pub fn lookup(&self, name: &Identifier) -> Option<V> {
        self.locals
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .map(|decl| decl.value.clone())
            .or_else(|| self.global.borrow().get(name).map(|decl| decl.value.clone()))
    }

    pub fn lookup_declaration(&self, name: &Identifier) -> Option<Declaration<V>> {
        self.locals
            .iter()
            .rev()
            .find_map(|frame| frame.get(name))
            .cloned()
            .or_else(|| self.global.borrow().get(name).cloned())
    }

    /// Requires an existing *mutable* binding; replaces its value in the
    /// frame that owns it.
    pub fn assign(&mut self, name: &Identifier, value: V) -> Result<(), AssignError> {
        for frame in self.locals.iter_mut().rev() {
            if let Some(decl) = frame.get_mut(name) {
                return if decl.mutable {
                    decl.value = value;
                    Ok(())
                } else {
                    Err(AssignError::NotMutable)
                };
            }
        }
        let mut global = self.global.borrow_mut();
        match global.get_mut(name) {
            Some(decl) if decl.mutable => {
                decl.value = value;
                Ok(())
            }
            Some(_) => Err(AssignError::NotMutable),
            None => Err(AssignError::NotFound),
        }
    }

    /// A snapshot usable to restore scope state after a failed, speculative
    /// operation (the REPL's per-input transactional checker wrapper, §4.6).
    /// A true deep copy, including the global frame, so later mutation of
    /// the live scope (this one) cannot leak into the saved snapshot.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn restore(&mut self, snapshot: Self) {
        *self = snapshot;
    }

    /// Closure capture (§3.4): the global frame is shared by reference
    /// (mutations after capture are visible both ways, including plain
    /// reassignment of a non-`Rc` global, not just interior-mutable state),
    /// while every local frame is deep-cloned so that later mutation in
    /// either copy is invisible to the other.
    pub fn capture(&self) -> Self {
        Self {
            global: Rc::clone(&self.global),
            locals: self.locals.clone(),
        }
    }
}

impl<V: Clone> Default for Scope<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The loop-label stack (§3.4): which labels are currently in scope, nearest
/// last, used to validate `break`/`continue` targets during checking.
#[derive(Clone, Debug, Default)]
pub struct LoopLabels {
    labels: Vec<Option<Identifier>>,
}

impl LoopLabels {
    pub fn new() -> Self {
        Self { labels: Vec::new() }
    }

    pub fn push(&mut self, label: Option<Identifier>) {
        self.labels.push(label);
    }

    pub fn pop(&mut self) {
        self.labels.pop();
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Whether a `break`/`continue` naming `label` (or naming nothing, which
    /// always targets the nearest loop) can be resolved against the loops
    /// currently open.
    pub fn resolves(&self, label: &Option<Identifier>) -> bool {
        match label {
            None => !self.labels.is_empty(),
            Some(wanted) => self.labels.iter().any(|l| l.as_ref() == Some(wanted)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_and_lookup() {
        let mut scope: Scope<i32> = Scope::new();
        scope.declare(Identifier::from("x"), false, true, 1).unwrap();
        assert_eq!(scope.lookup(&Identifier::from("x")), Some(1));
    }

    #[test]
    fn shadowing_a_non_shadowable_binding_fails() {
        let mut scope: Scope<i32> = Scope::new();
        scope.declare(Identifier::from("x"), false, false, 1).unwrap();
        scope.push_frame();
        let result = scope.declare(Identifier::from("x"), false, true, 2);
        assert_eq!(result, Err(DeclareError::AlreadyBound));
    }

    #[test]
    fn shadowing_an_allowed_binding_succeeds_in_a_nested_frame() {
        let mut scope: Scope<i32> = Scope::new();
        scope.declare(Identifier::from("x"), false, true, 1).unwrap();
        scope.push_frame();
        scope.declare(Identifier::from("x"), false, true, 2).unwrap();
        assert_eq!(scope.lookup(&Identifier::from("x")), Some(2));
        scope.pop_frame();
        assert_eq!(scope.lookup(&Identifier::from("x")), Some(1));
    }

    #[test]
    fn assign_requires_mutability() {
        let mut scope: Scope<i32> = Scope::new();
        scope.declare(Identifier::from("x"), false, true, 1).unwrap();
        assert_eq!(scope.assign(&Identifier::from("x"), 2), Err(AssignError::NotMutable));
        scope.declare(Identifier::from("y"), true, true, 1).unwrap();
        assert_eq!(scope.assign(&Identifier::from("y"), 2), Ok(()));
        assert_eq!(scope.lookup(&Identifier::from("y")), Some(2));
    }

    #[test]
    fn assign_to_undeclared_fails() {
        let mut scope: Scope<i32> = Scope::new();
        assert_eq!(scope.assign(&Identifier::from("z"), 1), Err(AssignError::NotFound));
    }

    #[test]
    fn snapshot_restore_undoes_later_declarations() {
        let mut scope: Scope<i32> = Scope::new();
        scope.declare(Identifier::from("x"), false, true, 1).unwrap();
        let snapshot = scope.snapshot();
        scope.declare(Identifier::from("y"), false, true, 2).unwrap();
        scope.restore(snapshot);
        assert!(scope.lookup(&Identifier::from("y")).is_none());
    }

    #[test]
    fn snapshot_restore_undoes_a_global_reassignment_too() {
        let mut scope: Scope<i32> = Scope::new();
        scope.declare(Identifier::from("x"), true, true, 1).unwrap();
        let snapshot = scope.snapshot();
        scope.assign(&Identifier::from("x"), 2).unwrap();
        scope.restore(snapshot);
        assert_eq!(scope.lookup(&Identifier::from("x")), Some(1));
    }

    #[test]
    fn capture_shares_the_global_frame_for_reassignment() {
        let mut scope: Scope<i32> = Scope::new();
        scope.declare(Identifier::from("counter"), true, true, 0).unwrap();
        let mut captured = scope.capture();
        captured.assign(&Identifier::from("counter"), 1).unwrap();
        assert_eq!(scope.lookup(&Identifier::from("counter")), Some(1));
        scope.assign(&Identifier::from("counter"), 2).unwrap();
        assert_eq!(captured.lookup(&Identifier::from("counter")), Some(2));
    }

    #[test]
    fn capture_still_deep_clones_local_frames() {
        let mut scope: Scope<i32> = Scope::new();
        scope.push_frame();
        scope.declare(Identifier::from("x"), true, true, 1).unwrap();
        let mut captured = scope.capture();
        captured.assign(&Identifier::from("x"), 2).unwrap();
        assert_eq!(scope.lookup(&Identifier::from("x")), Some(1));
    }

    #[test]
    fn loop_labels_resolve_nearest_when_absent() {
        let mut labels = LoopLabels::new();
        assert!(!labels.resolves(&None));
        labels.push(None);
        assert!(labels.resolves(&None));
    }

    #[test]
    fn loop_labels_resolve_by_name() {
        let mut labels = LoopLabels::new();
        labels.push(Some(Identifier::from("outer")));
        assert!(labels.resolves(&Some(Identifier::from("outer"))));
        assert!(!labels.resolves(&Some(Identifier::from("inner"))));
    }
}
