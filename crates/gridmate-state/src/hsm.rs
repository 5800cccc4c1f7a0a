//! # Hierarchical State Machine Helpers
//!
//! A minimal hierarchical state machine engine. A state type implements
//! [`Hierarchy`] to name its parent superstate; the root has no parent.
//!
//! - [`dispatch`] offers an event to the current state and then to each
//!   ancestor in turn until a handler reports [`Handled::Consumed`]. The
//!   root is expected to consume everything (the default handler).
//! - [`transition_path`] computes the exit and entry actions for a
//!   transition: exits run from the source up to (excluding) the least
//!   common ancestor, entries run from just below it down to the target.
//!   A transition to self exits and re-enters the state.
//!
//! The engine owns no data. Handlers and entry/exit actions live on the
//! machine that uses it.

use std::fmt::Debug;

/// A state that sits in a tree of superstates.
pub trait Hierarchy: Copy + Eq + Debug {
    /// The enclosing superstate, or `None` for the root.
    fn parent(self) -> Option<Self>;
}

/// Result of offering an event to one state's handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// The handler consumed the event; stop bubbling.
    Consumed,
    /// Offer the event to the parent superstate.
    Unhandled,
}

/// The chain `state, parent(state), ..., root`.
pub fn ancestry<S: Hierarchy>(state: S) -> Vec<S> {
    let mut chain = vec![state];
    let mut current = state;
    while let Some(parent) = current.parent() {
        chain.push(parent);
        current = parent;
    }
    chain
}

/// Whether `ancestor` is `state` or one of its superstates.
pub fn is_in<S: Hierarchy>(state: S, ancestor: S) -> bool {
    ancestry(state).contains(&ancestor)
}

/// Offer an event to `state` and its ancestors.
///
/// Returns the state whose handler consumed the event, or `None` if the
/// event fell off the root unhandled.
pub fn dispatch<S, F>(state: S, mut handler: F) -> Option<S>
where
    S: Hierarchy,
    F: FnMut(S) -> Handled,
{
    let mut current = Some(state);
    while let Some(s) = current {
        if handler(s) == Handled::Consumed {
            return Some(s);
        }
        current = s.parent();
    }
    None
}

/// States to exit (innermost first) and enter (outermost first) for a
/// transition from `from` to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPath<S> {
    /// Exit order.
    pub exit: Vec<S>,
    /// Entry order.
    pub enter: Vec<S>,
}

/// Compute the exit/entry path between two states.
pub fn transition_path<S: Hierarchy>(from: S, to: S) -> TransitionPath<S> {
    if from == to {
        return TransitionPath {
            exit: vec![from],
            enter: vec![to],
        };
    }

    let from_chain = ancestry(from);
    let to_chain = ancestry(to);
    let lca = from_chain.iter().copied().find(|s| to_chain.contains(s));

    let exit = from_chain
        .iter()
        .copied()
        .take_while(|s| Some(*s) != lca)
        .collect();
    let mut enter: Vec<S> = to_chain
        .iter()
        .copied()
        .take_while(|s| Some(*s) != lca)
        .collect();
    enter.reverse();

    TransitionPath { exit, enter }
}
