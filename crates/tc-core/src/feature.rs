use std::sync::Arc;

use serde::Serialize;

use crate::error::CoreError;
use crate::scale::lin_to_db;

/// Shape of a feature payload on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FeatureKind {
    /// One 32-bit float.
    Scalar,
    /// One boolean.
    Flag,
    /// Fixed-length sequence of 32-bit floats.
    Vector(usize),
}

/// What an analyzer declares about one of its outputs, before it gets an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureSpec {
    /// Feature name, last segment of the OSC address.
    pub name: &'static str,
    /// Payload shape.
    pub kind: FeatureKind,
}

impl FeatureSpec {
    /// Scalar float feature.
    #[must_use]
    pub const fn scalar(name: &'static str) -> Self {
        Self {
            name,
            kind: FeatureKind::Scalar,
        }
    }

    /// Boolean feature.
    #[must_use]
    pub const fn flag(name: &'static str) -> Self {
        Self {
            name,
            kind: FeatureKind::Flag,
        }
    }

    /// Vector feature of constant length.
    #[must_use]
    pub const fn vector(name: &'static str, len: usize) -> Self {
        Self {
            name,
            kind: FeatureKind::Vector(len),
        }
    }
}

/// One entry of the address catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FeatureDecl {
    /// Feature name.
    pub name: String,
    /// Full hierarchical address, `/domain/name`.
    pub address: String,
    /// Payload shape.
    pub kind: FeatureKind,
}

/// Ordered feature catalog: the stable addressing contract receivers rely on.
///
/// Built once at setup from the analyzers in registration order. The order
/// here is the order of messages on the wire.
///
/// # Example
/// ```
/// use tc_core::feature::{FeatureCatalog, FeatureSpec};
/// let mut catalog = FeatureCatalog::default();
/// catalog.push("essentia", FeatureSpec::scalar("rms")).unwrap();
/// assert_eq!(catalog.get(0).unwrap().address, "/essentia/rms");
/// assert!(catalog.push("essentia", FeatureSpec::scalar("rms")).is_err());
/// ```
#[derive(Clone, Debug, Default, Serialize)]
pub struct FeatureCatalog {
    decls: Vec<FeatureDecl>,
}

impl FeatureCatalog {
    /// Append a feature under `domain`.
    ///
    /// # Errors
    /// Returns an error if the resulting address is already declared.
    pub fn push(&mut self, domain: &str, spec: FeatureSpec) -> Result<(), CoreError> {
        let address = format!("/{}/{}", domain.trim_matches('/'), spec.name);
        if self.decls.iter().any(|d| d.address == address) {
            return Err(CoreError::DuplicateFeature { address });
        }
        self.decls.push(FeatureDecl {
            name: spec.name.to_string(),
            address,
            kind: spec.kind,
        });
        Ok(())
    }

    /// Number of declared features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.decls.len()
    }

    /// `true` if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Declaration at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&FeatureDecl> {
        self.decls.get(index)
    }

    /// Index of the first feature called `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.decls.iter().position(|d| d.name == name)
    }

    /// Declarations in wire order.
    pub fn iter(&self) -> impl Iterator<Item = &FeatureDecl> {
        self.decls.iter()
    }
}

/// Current value of one feature.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureValue {
    /// Scalar float.
    Scalar(f32),
    /// Boolean.
    Flag(bool),
    /// Float sequence.
    Vector(Vec<f32>),
}

impl FeatureValue {
    /// Neutral value of `kind`: 0, false, or a vector of zeros.
    #[must_use]
    pub fn zeroed(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::Scalar => Self::Scalar(0.0),
            FeatureKind::Flag => Self::Flag(false),
            FeatureKind::Vector(len) => Self::Vector(vec![0.0; len]),
        }
    }

    /// Scalar payload, if any.
    #[must_use]
    pub fn as_scalar(&self) -> Option<f32> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    #[must_use]
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            _ => None,
        }
    }

    /// Vector payload, if any.
    #[must_use]
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Self::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// `true` when no float in the payload is NaN or infinite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Scalar(v) => v.is_finite(),
            Self::Flag(_) => true,
            Self::Vector(v) => v.iter().all(|x| x.is_finite()),
        }
    }

    /// `true` if this value fits the declared kind.
    #[must_use]
    pub fn matches(&self, kind: FeatureKind) -> bool {
        match (self, kind) {
            (Self::Scalar(_), FeatureKind::Scalar) | (Self::Flag(_), FeatureKind::Flag) => true,
            (Self::Vector(v), FeatureKind::Vector(len)) => v.len() == len,
            _ => false,
        }
    }
}

/// Every feature value of one tick, aligned with the catalog.
///
/// Immutable once built; the encoder only reads it.
#[derive(Clone, Debug)]
pub struct FeatureSnapshot {
    tick: u64,
    catalog: Arc<FeatureCatalog>,
    values: Vec<FeatureValue>,
}

impl FeatureSnapshot {
    /// Assemble a snapshot. `values` must follow the catalog order.
    #[must_use]
    pub fn new(tick: u64, catalog: Arc<FeatureCatalog>, values: Vec<FeatureValue>) -> Self {
        debug_assert_eq!(catalog.len(), values.len(), "snapshot misaligned with catalog");
        Self {
            tick,
            catalog,
            values,
        }
    }

    /// Tick the snapshot was built for.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Catalog shared by every snapshot of the session.
    #[must_use]
    pub fn catalog(&self) -> &Arc<FeatureCatalog> {
        &self.catalog
    }

    /// Number of features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if the snapshot carries no feature.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the first feature named `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.catalog.position(name).and_then(|i| self.values.get(i))
    }

    /// (declaration, value) pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&FeatureDecl, &FeatureValue)> {
        self.catalog.iter().zip(self.values.iter())
    }
}

/// Positional writer handed to each analyzer's `latest`.
///
/// Analyzers write their outputs in the order they declared them. Vectors are
/// fitted to their declared length so the wire shape never changes between ticks.
pub struct FeatureWriter<'a> {
    catalog: &'a FeatureCatalog,
    values: &'a mut Vec<FeatureValue>,
    db_floor: f32,
}

impl<'a> FeatureWriter<'a> {
    /// Writer appending to `values`. `db_floor` is the clamp used by [`Self::vector_db`].
    pub fn new(catalog: &'a FeatureCatalog, values: &'a mut Vec<FeatureValue>, db_floor: f32) -> Self {
        Self {
            catalog,
            values,
            db_floor,
        }
    }

    /// Number of values written so far.
    #[must_use]
    pub fn written(&self) -> usize {
        self.values.len()
    }

    /// Write a scalar.
    pub fn scalar(&mut self, name: &str, value: f32) {
        self.check(name);
        self.values.push(FeatureValue::Scalar(value));
    }

    /// Write a boolean.
    pub fn flag(&mut self, name: &str, value: bool) {
        self.check(name);
        self.values.push(FeatureValue::Flag(value));
    }

    /// Copy a vector verbatim.
    pub fn vector(&mut self, name: &str, value: &[f32]) {
        let len = self.declared_len(name, value.len());
        let mut out = Vec::with_capacity(len);
        out.extend(value.iter().take(len).copied());
        out.resize(len, 0.0);
        self.values.push(FeatureValue::Vector(out));
    }

    /// Write linear energies as `20*log10(max(x, floor))`.
    pub fn vector_db(&mut self, name: &str, energies: &[f32]) {
        let len = self.declared_len(name, energies.len());
        let floor = self.db_floor;
        let mut out = Vec::with_capacity(len);
        out.extend(energies.iter().take(len).map(|&x| lin_to_db(x, floor)));
        out.resize(len, lin_to_db(0.0, floor));
        self.values.push(FeatureValue::Vector(out));
    }

    fn declared_len(&self, name: &str, fallback: usize) -> usize {
        self.check(name);
        match self.catalog.get(self.values.len()).map(|d| d.kind) {
            Some(FeatureKind::Vector(len)) => len,
            _ => fallback,
        }
    }

    fn check(&self, name: &str) {
        debug_assert_eq!(
            self.catalog.get(self.values.len()).map(|d| d.name.as_str()),
            Some(name),
            "feature written out of declaration order"
        );
    }
}
