//! Speakerfix Core - Domain types and the repair decision
//!
//! This crate provides:
//! - Pod keys used for queue dedup and cache lookups
//! - Workload and speaker pod views extracted from Kubernetes objects
//! - The scope filter selecting which workload pods are repaired
//! - The race decision between readiness and speaker start
//! - Error types with miette diagnostics

pub mod decision;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use decision::needs_repair;
pub use error::{CoreError, Result};
pub use types::{ready_transition_time, PodKey, PodScope, SpeakerPod, WorkloadPod};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::Pod;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
