//! Subscription identity.
//!
//! A [`SubscriptionDescriptor`] is everything that makes two listener
//! requests interchangeable. Its [`DescriptorKey`] is a SHA-256 over the
//! canonical JSON form (object keys sorted), so equal descriptors always map
//! to the same key regardless of how they were built.

use crate::config::SubscriptionTimewindow;
use crate::error::{Result, SubscriptionError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Where a datasource's samples come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatasourceType {
    /// Telemetry and attributes of a device or other entity, via the transport.
    Entity,
    /// Samples generated locally by a registered function.
    Function,
}

/// What the consumer renders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionKind {
    /// A window of samples per series.
    #[default]
    Timeseries,
    /// Only the latest value per series.
    Latest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataKeyType {
    Timeseries,
    Attribute,
    Function,
}

/// One series requested by a datasource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDataKey {
    /// Series name; also the generator name when a function key has none.
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: DataKeyType,
    /// Generator in the [`FunctionRegistry`](crate::functions::FunctionRegistry), for function keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func_name: Option<String>,
    /// Post-processor applied to every delivered value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_func_name: Option<String>,
}

impl SubscriptionDataKey {
    pub fn timeseries(name: impl Into<String>) -> Self {
        Self { name: name.into(), key_type: DataKeyType::Timeseries, func_name: None, post_func_name: None }
    }

    pub fn attribute(name: impl Into<String>) -> Self {
        Self { name: name.into(), key_type: DataKeyType::Attribute, func_name: None, post_func_name: None }
    }

    pub fn function(name: impl Into<String>, func_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_type: DataKeyType::Function,
            func_name: Some(func_name.into()),
            post_func_name: None,
        }
    }

    #[must_use]
    pub fn with_post_func(mut self, post_func_name: impl Into<String>) -> Self {
        self.post_func_name = Some(post_func_name.into());
        self
    }
}

/// Immutable identity of one shared upstream subscription.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDescriptor {
    pub datasource_type: DatasourceType,
    pub data_keys: Vec<SubscriptionDataKey>,
    #[serde(rename = "type")]
    pub kind: SubscriptionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Must be resolved before subscribing an entity datasource.
    pub entity_id: Option<String>,
    /// Present for timeseries subscriptions only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timewindow: Option<SubscriptionTimewindow>,
}

impl SubscriptionDescriptor {
    pub fn entity(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        data_keys: Vec<SubscriptionDataKey>,
        kind: SubscriptionKind,
        timewindow: Option<SubscriptionTimewindow>,
    ) -> Self {
        Self {
            datasource_type: DatasourceType::Entity,
            data_keys,
            kind,
            entity_type: Some(entity_type.into()),
            entity_id: Some(entity_id.into()),
            timewindow,
        }
    }

    #[must_use]
    pub fn function(data_keys: Vec<SubscriptionDataKey>, kind: SubscriptionKind, timewindow: Option<SubscriptionTimewindow>) -> Self {
        Self { datasource_type: DatasourceType::Function, data_keys, kind, entity_type: None, entity_id: None, timewindow }
    }

    /// Timewindow of a timeseries subscription; latest-value subscriptions carry none.
    #[must_use]
    pub fn effective_timewindow(&self) -> Option<&SubscriptionTimewindow> {
        match self.kind {
            SubscriptionKind::Timeseries => self.timewindow.as_ref(),
            SubscriptionKind::Latest => None,
        }
    }

    #[must_use]
    pub fn is_history(&self) -> bool {
        self.effective_timewindow().is_some_and(SubscriptionTimewindow::is_history)
    }

    #[must_use]
    pub fn is_realtime(&self) -> bool {
        self.effective_timewindow().is_some_and(SubscriptionTimewindow::is_realtime)
    }

    /// Check that the descriptor can be started.
    ///
    /// # Errors
    ///
    /// - `UnresolvedEntity` for an entity datasource without an entity id
    /// - `MissingTimewindow` for a timeseries subscription without a timewindow
    /// - `Config` when the timewindow parameters are invalid
    pub fn validate(&self) -> Result<()> {
        if self.datasource_type == DatasourceType::Entity && self.entity_id.as_deref().is_none_or(str::is_empty) {
            return Err(SubscriptionError::UnresolvedEntity);
        }
        if self.kind == SubscriptionKind::Timeseries {
            let tw = self.timewindow.as_ref().ok_or(SubscriptionError::MissingTimewindow)?;
            tw.validate()?;
        }
        Ok(())
    }

    /// Canonical content hash.
    ///
    /// Every type in a descriptor is a struct or a list, so the JSON field order
    /// is the declaration order and equal descriptors serialize to equal bytes.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error if the descriptor cannot be serialized.
    pub fn key(&self) -> Result<DescriptorKey> {
        let bytes = serde_json::to_vec(self).map_err(crate::error::ConfigError::from)?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let hex = hasher.finalize().iter().map(|b| format!("{b:02x}")).collect();
        Ok(DescriptorKey(hex))
    }
}

/// Hex SHA-256 of a canonical descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorKey(String);

impl DescriptorKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DescriptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
