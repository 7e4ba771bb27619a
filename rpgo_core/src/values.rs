// rpgo_core/src/values.rs

use nalgebra::{DVector, Isometry2, Isometry3, Vector2, Vector3};
use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::types::Key;

pub type Pose2 = Isometry2<f64>;
pub type Pose3 = Isometry3<f64>;

// --- POSE TRAIT ---
/// A rigid-body transform living on a matrix Lie group.
///
/// The tangent-space chart is fixed per type:
/// * `Pose2`: `[x, y, theta]`
/// * `Pose3`: `[wx, wy, wz, x, y, z]` (rotation first)
///
/// `retract`/`local` are built from `expmap`/`logmap` so that
/// `a.local(&a.retract(d)) == d` for small `d`.
pub trait Pose: Copy + Debug + Send + Sync + 'static {
    /// Tangent-space dimension.
    const DIM: usize;

    fn identity() -> Self;
    fn compose(&self, other: &Self) -> Self;
    fn inverse(&self) -> Self;

    /// Maps the group element to its tangent-space coordinates.
    fn logmap(&self) -> DVector<f64>;

    /// Maps tangent-space coordinates back onto the group.
    fn expmap(delta: &DVector<f64>) -> Self;

    fn translation_norm(&self) -> f64;
    fn rotation_angle(&self) -> f64;

    fn from_value(value: &Value) -> Option<Self>;
    fn into_value(self) -> Value;

    /// `self⁻¹ ∘ other`
    fn between(&self, other: &Self) -> Self {
        self.inverse().compose(other)
    }

    /// `self ∘ exp(delta)`
    fn retract(&self, delta: &DVector<f64>) -> Self {
        self.compose(&Self::expmap(delta))
    }

    /// `log(self⁻¹ ∘ other)`
    fn local(&self, other: &Self) -> DVector<f64> {
        self.between(other).logmap()
    }
}

impl Pose for Pose2 {
    const DIM: usize = 3;

    fn identity() -> Self {
        Isometry2::identity()
    }

    fn compose(&self, other: &Self) -> Self {
        self * other
    }

    fn inverse(&self) -> Self {
        Isometry2::inverse(self)
    }

    fn logmap(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.translation.x,
            self.translation.y,
            self.rotation.angle(),
        ])
    }

    fn expmap(delta: &DVector<f64>) -> Self {
        Isometry2::new(Vector2::new(delta[0], delta[1]), delta[2])
    }

    fn translation_norm(&self) -> f64 {
        self.translation.vector.norm()
    }

    fn rotation_angle(&self) -> f64 {
        self.rotation.angle().abs()
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Pose2(p) => Some(*p),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Pose2(self)
    }
}

impl Pose for Pose3 {
    const DIM: usize = 6;

    fn identity() -> Self {
        Isometry3::identity()
    }

    fn compose(&self, other: &Self) -> Self {
        self * other
    }

    fn inverse(&self) -> Self {
        Isometry3::inverse(self)
    }

    fn logmap(&self) -> DVector<f64> {
        let w = self.rotation.scaled_axis();
        let t = self.translation.vector;
        DVector::from_vec(vec![w.x, w.y, w.z, t.x, t.y, t.z])
    }

    fn expmap(delta: &DVector<f64>) -> Self {
        Isometry3::new(
            Vector3::new(delta[3], delta[4], delta[5]),
            Vector3::new(delta[0], delta[1], delta[2]),
        )
    }

    fn translation_norm(&self) -> f64 {
        self.translation.vector.norm()
    }

    fn rotation_angle(&self) -> f64 {
        self.rotation.angle()
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Pose3(p) => Some(*p),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Pose3(self)
    }
}

// --- VALUE ---
/// The estimate of a single variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Pose2(Pose2),
    Pose3(Pose3),
}

impl Value {
    /// Tangent-space dimension of the variable.
    pub fn dim(&self) -> usize {
        match self {
            Value::Pose2(_) => Pose2::DIM,
            Value::Pose3(_) => Pose3::DIM,
        }
    }

    pub fn retract(&self, delta: &DVector<f64>) -> Value {
        match self {
            Value::Pose2(p) => Value::Pose2(Pose::retract(p, delta)),
            Value::Pose3(p) => Value::Pose3(Pose::retract(p, delta)),
        }
    }

    /// Local coordinates of `other` around `self`, or `None` on a type mismatch.
    pub fn local(&self, other: &Value) -> Option<DVector<f64>> {
        match (self, other) {
            (Value::Pose2(a), Value::Pose2(b)) => Some(Pose::local(a, b)),
            (Value::Pose3(a), Value::Pose3(b)) => Some(Pose::local(a, b)),
            _ => None,
        }
    }

    /// `self⁻¹ ∘ other`, or `None` on a type mismatch.
    pub fn between(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Pose2(a), Value::Pose2(b)) => Some(Value::Pose2(Pose::between(a, b))),
            (Value::Pose3(a), Value::Pose3(b)) => Some(Value::Pose3(Pose::between(a, b))),
            _ => None,
        }
    }

    pub fn inverse(&self) -> Value {
        match self {
            Value::Pose2(p) => Value::Pose2(Pose::inverse(p)),
            Value::Pose3(p) => Value::Pose3(Pose::inverse(p)),
        }
    }
}

impl From<Pose2> for Value {
    fn from(pose: Pose2) -> Self {
        Value::Pose2(pose)
    }
}

impl From<Pose3> for Value {
    fn from(pose: Pose3) -> Self {
        Value::Pose3(pose)
    }
}

// --- VALUES ---
/// The value assignment: the current estimate of every variable, ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    inner: BTreeMap<Key, Value>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a variable unless it already has an estimate.
    /// Returns `true` if the value was inserted.
    pub fn insert(&mut self, key: Key, value: impl Into<Value>) -> bool {
        if self.inner.contains_key(&key) {
            return false;
        }
        self.inner.insert(key, value.into());
        true
    }

    /// Inserts every variable of `other` that does not exist yet.
    /// Returns the number of newly inserted variables.
    pub fn insert_missing(&mut self, other: &Values) -> usize {
        other
            .iter()
            .filter(|(key, value)| self.insert(**key, **value))
            .count()
    }

    /// Overwrites (or inserts) the estimate of a variable.
    pub fn update(&mut self, key: Key, value: impl Into<Value>) {
        self.inner.insert(key, value.into());
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.inner.get(key)
    }

    /// Typed lookup; `None` if the key is absent or holds another pose type.
    pub fn pose<P: Pose>(&self, key: &Key) -> Option<P> {
        self.inner.get(key).and_then(P::from_value)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.inner.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Value)> {
        self.inner.iter()
    }
}

impl FromIterator<(Key, Value)> for Values {
    fn from_iter<I: IntoIterator<Item = (Key, Value)>>(iter: I) -> Self {
        let mut values = Values::new();
        for (key, value) in iter {
            values.insert(key, value);
        }
        values
    }
}
