//! `OperationPath` — an ordered, hashable identifier sequence with prefix
//! matching.
//!
//! Paths key every store in the [`crate::client::Client`]'s cache the way
//! `pmcp_tasks::store::backend`'s composite `{owner_id}:{task_id}` keys
//! scope storage lookups, except a path is a structured sequence rather
//! than a colon-joined string, so that `["friends"]` is a true prefix of
//! `["friends", 1]` without string-parsing ambiguity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A single hashable, equatable, type-erased path element.
///
/// Any `T: Eq + Hash + Send + Sync + fmt::Debug + 'static` can be lifted
/// into a [`PathElement`] via [`PathElement::new`]. Equality and hashing
/// are structural and only ever compare elements of the same concrete
/// type — an element built from `1_i32` never equals one built from
/// `1_i64`.
#[derive(Clone)]
pub struct PathElement(Arc<dyn ErasedElement>);

trait ErasedElement: Send + Sync + fmt::Debug {
    fn eq_erased(&self, other: &dyn ErasedElement) -> bool;
    fn hash_erased(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn std::any::Any;
}

struct Typed<T>(T);

impl<T: Eq + Hash + Send + Sync + fmt::Debug + 'static> ErasedElement for Typed<T> {
    fn eq_erased(&self, other: &dyn ErasedElement) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|o| &self.0 == o)
    }

    fn hash_erased(&self, mut state: &mut dyn Hasher) {
        // Mix in the type id so that values of different types never
        // collide purely by coincidence of their inner hash.
        std::any::TypeId::of::<T>().hash(&mut state);
        self.0.hash(&mut state);
    }

    fn as_any(&self) -> &dyn std::any::Any {
        &self.0
    }
}

impl<T> fmt::Debug for Typed<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PathElement {
    /// Lift a concrete value into a type-erased path element.
    pub fn new<T: Eq + Hash + Send + Sync + fmt::Debug + 'static>(value: T) -> Self {
        Self(Arc::new(Typed(value)))
    }

    /// Downcast back to the concrete type, if it matches.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for PathElement {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_erased(other.0.as_ref())
    }
}

impl Eq for PathElement {}

impl Hash for PathElement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_erased(state);
    }
}

impl fmt::Debug for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<T: Eq + Hash + Send + Sync + fmt::Debug + 'static> From<T> for PathElement {
    fn from(value: T) -> Self {
        PathElement::new(value)
    }
}

/// An ordered sequence of [`PathElement`]s identifying an operation
/// request. Equality and hashing are structural (element-wise).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct OperationPath(Vec<PathElement>);

impl OperationPath {
    /// The empty path — a prefix of every path, including itself.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a path from an iterator of elements.
    pub fn from_elements(elements: impl IntoIterator<Item = PathElement>) -> Self {
        Self(elements.into_iter().collect())
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this path has no elements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append an element, returning a new path.
    pub fn appending(&self, element: impl Into<PathElement>) -> Self {
        let mut elements = self.0.clone();
        elements.push(element.into());
        Self(elements)
    }

    /// `true` if `self` is a prefix of `other`.
    ///
    /// The empty path is a prefix of anything. Otherwise every element of
    /// `self`, in order, must equal the element at the same index in
    /// `other`.
    pub fn is_prefix_of(&self, other: &OperationPath) -> bool {
        if self.0.len() > other.0.len() {
            return false;
        }
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Iterate the path's elements.
    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }
}

impl fmt::Display for OperationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, element) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{element:?}")?;
        }
        write!(f, "]")
    }
}

impl FromIterator<PathElement> for OperationPath {
    fn from_iter<I: IntoIterator<Item = PathElement>>(iter: I) -> Self {
        Self::from_elements(iter)
    }
}
