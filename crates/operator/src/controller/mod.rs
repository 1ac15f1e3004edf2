// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! Controller wiring: one worker loop per entity kind, all sharing a
//! context built once at startup.

use std::sync::Arc;

use kube::runtime::events::{Event, EventType, Recorder};
use kube::Client;
use tokio::sync::RwLock;
use tracing::error;

use crate::config::RunConfig;
use crate::diagnostics::Diagnostics;
use crate::metrics::{Metrics, MetricsSnapshot};

pub mod binding;
pub mod custom_rule;
pub mod profile_bundle;
pub mod remediation;
pub mod scan;
pub mod suite;
pub mod tailored_profile;

/// Context for the reconcilers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Process configuration resolved at startup
    pub config: RunConfig,
    /// Diagnostics shared with the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Kubernetes event emitter
    pub recorder: Recorder,
    /// Operator counters
    pub metrics: Metrics,
}

impl Context {
    /// Publishes a normal event; failures to record are not worth failing a
    /// reconcile over.
    pub async fn publish_event(
        &self,
        oref: &k8s_openapi::api::core::v1::ObjectReference,
        reason: &str,
        action: &str,
        note: String,
    ) {
        self.recorder
            .publish(
                &Event {
                    type_: EventType::Normal,
                    reason: reason.to_string(),
                    note: Some(note),
                    action: action.to_string(),
                    secondary: None,
                },
                oref,
            )
            .await
            .ok();
    }

    pub async fn publish_warning(
        &self,
        oref: &k8s_openapi::api::core::v1::ObjectReference,
        reason: &str,
        action: &str,
        note: String,
    ) {
        self.recorder
            .publish(
                &Event {
                    type_: EventType::Warning,
                    reason: reason.to_string(),
                    note: Some(note),
                    action: action.to_string(),
                    secondary: None,
                },
                oref,
            )
            .await
            .ok();
    }

    pub async fn touch(&self) {
        let mut diag = self.diagnostics.write().await;
        diag.last_event = k8s_openapi::chrono::Utc::now();
    }
}

#[derive(Clone, Default)]
pub struct State {
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub metrics: Metrics,
}

impl State {
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn to_ctrl_context(&self, client: Client, config: RunConfig) -> Arc<Context> {
        Arc::new(Context {
            recorder: self.diagnostics.read().await.recorder(client.clone()),
            client,
            config,
            diagnostics: self.diagnostics.clone(),
            metrics: self.metrics.clone(),
        })
    }
}

/// Initialize every controller loop (given the crds are installed).
/// Controllers only start once this replica holds the leadership lease.
pub async fn run(state: State, config: RunConfig) {
    let client = Client::try_default()
        .await
        .expect("failed to create kube Client");

    let (leader_tx, mut leader_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(crate::lease::run_leader_election(
        client.clone(),
        leader_tx,
    ));
    while !*leader_rx.borrow() {
        if leader_rx.changed().await.is_err() {
            return;
        }
    }

    let ctx = state.to_ctrl_context(client.clone(), config).await;

    // A single missing CRD would put every loop into an error spin; bail
    // out early and loudly instead.
    if let Err(e) = scan::preflight(&ctx).await {
        error!(error = %e, "CRDs are not installed or not reachable");
        std::process::exit(1);
    }

    tokio::join!(
        profile_bundle::run(ctx.clone()),
        custom_rule::run(ctx.clone()),
        tailored_profile::run(ctx.clone()),
        binding::run(ctx.clone()),
        suite::run(ctx.clone()),
        scan::run(ctx.clone()),
        remediation::run(ctx),
    );
}
