//! Composable predicates over the IR graph.
//!
//! A matcher is an expression tree built from a closed set of node kinds -
//! exact name, "any method of this list satisfies", conjunction, negation -
//! and evaluated by one pure interpreter per entity kind. Evaluation never
//! mutates and never caches, so a matcher can be run repeatedly against a
//! graph that passes keep rewriting without any staleness.
//!
//! The `&` and `!` operators compose matchers the way the queries read:
//!
//! ```rust
//! use dexopt::matcher::{any_direct_method, class_named, method_named};
//!
//! let alpha_accessor_gone = class_named("Lcom/example/Alpha;")
//!     & !any_direct_method(method_named("access$000"));
//! # let _ = alpha_accessor_gone;
//! ```

use std::ops::{BitAnd, Not};

use crate::ir::class::{DexClass, FieldDef, MethodDef, MethodListKind};
use crate::ir::context::DexContext;
use crate::ir::store::{program_classes, DexStore};

/// Predicate over a [`DexClass`].
#[derive(Debug, Clone)]
pub enum ClassMatcher {
    /// Exact match on the class's type descriptor.
    Named(String),
    /// At least one method in the given method list satisfies the inner
    /// matcher.
    AnyMethod(MethodListKind, Box<MethodMatcher>),
    /// Both operands match, evaluated left-to-right with short-circuiting.
    All(Box<ClassMatcher>, Box<ClassMatcher>),
    /// The operand does not match.
    Not(Box<ClassMatcher>),
}

/// Predicate over a [`MethodDef`].
#[derive(Debug, Clone)]
pub enum MethodMatcher {
    /// Exact match on the method's name.
    Named(String),
    /// Both operands match.
    All(Box<MethodMatcher>, Box<MethodMatcher>),
    /// The operand does not match.
    Not(Box<MethodMatcher>),
}

/// Predicate over a [`FieldDef`].
#[derive(Debug, Clone)]
pub enum FieldMatcher {
    /// Exact match on the field's name.
    Named(String),
    /// Both operands match.
    All(Box<FieldMatcher>, Box<FieldMatcher>),
    /// The operand does not match.
    Not(Box<FieldMatcher>),
}

/// Matches a class by exact type descriptor.
#[must_use]
pub fn class_named(descriptor: impl Into<String>) -> ClassMatcher {
    ClassMatcher::Named(descriptor.into())
}

/// Matches a class with at least one direct method satisfying `inner`.
#[must_use]
pub fn any_direct_method(inner: MethodMatcher) -> ClassMatcher {
    ClassMatcher::AnyMethod(MethodListKind::Direct, Box::new(inner))
}

/// Matches a class with at least one virtual method satisfying `inner`.
#[must_use]
pub fn any_virtual_method(inner: MethodMatcher) -> ClassMatcher {
    ClassMatcher::AnyMethod(MethodListKind::Virtual, Box::new(inner))
}

/// Matches a method by exact name.
#[must_use]
pub fn method_named(name: impl Into<String>) -> MethodMatcher {
    MethodMatcher::Named(name.into())
}

/// Matches a field by exact name.
#[must_use]
pub fn field_named(name: impl Into<String>) -> FieldMatcher {
    FieldMatcher::Named(name.into())
}

impl ClassMatcher {
    /// Evaluates this matcher against one class.
    #[must_use]
    pub fn matches(&self, ctx: &DexContext, class: &DexClass) -> bool {
        match self {
            ClassMatcher::Named(descriptor) => {
                ctx.type_descriptor(class.ty) == Some(descriptor.as_str())
            }
            ClassMatcher::AnyMethod(kind, inner) => class
                .methods(*kind)
                .iter()
                .any(|m| inner.matches(ctx, m)),
            ClassMatcher::All(left, right) => {
                left.matches(ctx, class) && right.matches(ctx, class)
            }
            ClassMatcher::Not(inner) => !inner.matches(ctx, class),
        }
    }
}

impl MethodMatcher {
    /// Evaluates this matcher against one method definition.
    #[must_use]
    pub fn matches(&self, ctx: &DexContext, method: &MethodDef) -> bool {
        match self {
            MethodMatcher::Named(name) => ctx
                .method(method.id)
                .is_some_and(|mref| ctx.string(mref.name) == Some(name.as_str())),
            MethodMatcher::All(left, right) => {
                left.matches(ctx, method) && right.matches(ctx, method)
            }
            MethodMatcher::Not(inner) => !inner.matches(ctx, method),
        }
    }
}

impl FieldMatcher {
    /// Evaluates this matcher against one field definition.
    #[must_use]
    pub fn matches(&self, ctx: &DexContext, field: &FieldDef) -> bool {
        match self {
            FieldMatcher::Named(name) => ctx
                .field(field.id)
                .is_some_and(|fref| ctx.string(fref.name) == Some(name.as_str())),
            FieldMatcher::All(left, right) => {
                left.matches(ctx, field) && right.matches(ctx, field)
            }
            FieldMatcher::Not(inner) => !inner.matches(ctx, field),
        }
    }
}

macro_rules! matcher_ops {
    ($($matcher:ident),*) => {
        $(
            impl BitAnd for $matcher {
                type Output = $matcher;

                fn bitand(self, rhs: $matcher) -> $matcher {
                    $matcher::All(Box::new(self), Box::new(rhs))
                }
            }

            impl Not for $matcher {
                type Output = $matcher;

                fn not(self) -> $matcher {
                    $matcher::Not(Box::new(self))
                }
            }
        )*
    };
}

matcher_ops!(ClassMatcher, MethodMatcher, FieldMatcher);

/// Does any class in the stores satisfy the matcher?
#[must_use]
pub fn any_class(stores: &[DexStore], ctx: &DexContext, matcher: &ClassMatcher) -> bool {
    program_classes(stores).any(|class| matcher.matches(ctx, class))
}
