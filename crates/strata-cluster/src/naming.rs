//! Naming for immutable infrastructure objects
//!
//! Machine templates and bootstrap config templates cannot change after
//! creation. A changed template is rolled out by creating a copy under a new
//! name and pointing the owner (control plane, machine deployment) at it.
//!
//! The namer decides which name to use:
//! - no live object: the fresh name
//! - live object equivalent to the desired one: the live name
//! - otherwise: the live name with its numeric suffix incremented
//!   (`prod-md-0-3` becomes `prod-md-0-4`), or the fresh name when the live
//!   name has no numeric suffix
//!
//! Equivalence ignores fields the desired object leaves unset or at their zero
//! value, since the API server fills in defaults. Fields where "unset" and
//! "empty" mean different things (taint lists) are compared exactly.

use kube::api::DynamicObject;
use serde_json::Value;

use strata_common::kube_utils::{object_name, object_spec};

/// Taints on worker nodes, relative to a KubeadmConfigTemplate spec
pub const WORKER_TAINTS_POINTER: &str = "/template/spec/joinConfiguration/nodeRegistration/taints";

/// Returns true if a value counts as unset: null or a zero value
/// (`false`, `0`, `""`, `[]`, `{}`)
pub fn is_unset(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Returns true if every field `candidate` sets has the same value in `base`.
///
/// Unset and zero-valued fields in `candidate` match anything. Arrays must
/// have the same length and be element-wise derivatives. Set scalars compare
/// exactly.
pub fn is_derivative(candidate: &Value, base: &Value) -> bool {
    if is_unset(candidate) {
        return true;
    }
    match (candidate, base) {
        (Value::Object(c), Value::Object(b)) => c.iter().all(|(key, value)| match b.get(key) {
            Some(other) => is_derivative(value, other),
            None => is_unset(value),
        }),
        (Value::Array(c), Value::Array(b)) => {
            c.len() == b.len() && c.iter().zip(b).all(|(x, y)| is_derivative(x, y))
        }
        (c, b) => c == b,
    }
}

/// Increment the trailing numeric suffix of a name.
///
/// Returns `None` when the name has no `-N` suffix.
pub fn increment_name(name: &str) -> Option<String> {
    let (base, suffix) = name.rsplit_once('-')?;
    if base.is_empty() || suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = suffix.parse().ok()?;
    Some(format!("{}-{}", base, n.checked_add(1)?))
}

/// The name chosen for a desired object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectName {
    /// Name to apply the desired object under
    pub name: String,
    /// True when the desired object replaces a live one under a new name
    pub rotated: bool,
}

impl ObjectName {
    fn keep(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rotated: false,
        }
    }

    fn rotate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rotated: true,
        }
    }
}

/// Chooses names for immutable objects by diffing desired against live specs
#[derive(Clone, Copy, Debug, Default)]
pub struct ImmutableObjectNamer<'a> {
    exact_fields: &'a [&'a str],
}

impl<'a> ImmutableObjectNamer<'a> {
    /// Namer comparing the given JSON pointers (relative to `spec`) exactly
    pub const fn new(exact_fields: &'a [&'a str]) -> Self {
        Self { exact_fields }
    }

    /// Returns true if two specs describe the same object.
    ///
    /// Each must be a derivative of the other once the exact fields are set
    /// aside, and the exact fields must be equal (missing differs from empty).
    pub fn equivalent(&self, desired: &Value, live: &Value) -> bool {
        if self
            .exact_fields
            .iter()
            .any(|pointer| desired.pointer(pointer) != live.pointer(pointer))
        {
            return false;
        }

        let mut desired = desired.clone();
        let mut live = live.clone();
        for pointer in self.exact_fields {
            remove_pointer(&mut desired, pointer);
            remove_pointer(&mut live, pointer);
        }
        is_derivative(&desired, &live) && is_derivative(&live, &desired)
    }

    /// Name for `desired_spec` given the object currently in use, if any
    pub fn name(
        &self,
        fresh_name: &str,
        desired_spec: &Value,
        live: Option<&DynamicObject>,
    ) -> ObjectName {
        match live {
            None => ObjectName::keep(fresh_name),
            Some(live) if self.equivalent(desired_spec, object_spec(live)) => {
                ObjectName::keep(object_name(live))
            }
            Some(live) => ObjectName::rotate(next_name(fresh_name, object_name(live))),
        }
    }

    /// Name for an object paired with a dependent that may be rotating.
    ///
    /// A worker's machine template is recreated together with its bootstrap
    /// config template, so a rotated dependent forces a new name here even
    /// when this object's own spec did not change.
    pub fn name_paired(
        &self,
        fresh_name: &str,
        desired_spec: &Value,
        live: Option<&DynamicObject>,
        dependent_rotated: bool,
    ) -> ObjectName {
        let named = self.name(fresh_name, desired_spec, live);
        match live {
            Some(live) if dependent_rotated && !named.rotated => {
                ObjectName::rotate(next_name(fresh_name, object_name(live)))
            }
            _ => named,
        }
    }
}

fn next_name(fresh_name: &str, live_name: &str) -> String {
    increment_name(live_name).unwrap_or_else(|| fresh_name.to_string())
}

fn remove_pointer(value: &mut Value, pointer: &str) {
    let Some((parent, key)) = pointer.rsplit_once('/') else {
        return;
    };
    let key = key.replace("~1", "/").replace("~0", "~");
    if let Some(Value::Object(map)) = value.pointer_mut(parent) {
        map.remove(&key);
    }
}
