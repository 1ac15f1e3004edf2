// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! The scan lifecycle as a pure transition function. The reconcile shell
//! observes the cluster, calls [`step`], and executes the returned actions;
//! nothing here touches the API server, which keeps every phase unit
//! testable.

use compliance_crd::v1_alpha1::{ScanPhase, ScanResult};

/// What the reconcile shell observed about the scan's workloads this pass.
#[derive(Clone, Debug, Default)]
pub struct Observed {
    /// Set when spec validation failed; short-circuits to Done/Error.
    pub spec_error: Option<String>,
    /// The tailoring ConfigMap (if referenced) exists and parses.
    pub tailoring_ready: bool,
    /// The raw-results PVC exists and is bound.
    pub pvc_bound: bool,
    /// Whether this scan needs a result server at all (OpenSCAP only).
    pub needs_result_server: bool,
    pub result_server_ready: bool,
    /// Scanner pods (or the single platform pod) have been created.
    pub workload_created: bool,
    /// Every scanner pod terminated in a result-bearing state.
    pub pods_done: bool,
    /// An unrecoverable startup failure, e.g. ImagePullBackOff.
    pub pod_failure: Option<String>,
    /// Scanner exit codes collected from terminated pods.
    pub exit_codes: Vec<i32>,
    /// Aggregation finished (the aggregator pod for OpenSCAP; in-process
    /// and therefore immediate for CEL).
    pub aggregation_done: bool,
    /// The current phase outlived the scan's timeout.
    pub timed_out: bool,
    /// The rescan annotation changed since the last completed run.
    pub rescan_requested: bool,
}

/// Side effects the shell must execute, in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    CreatePvc,
    CreateResultServer,
    CreateScannerWorkload,
    CreateAggregator,
    /// Record the final result and optional error message.
    RecordResult(ScanResult, Option<String>),
    SetTimeoutCondition,
    /// Prune old run directories down to rotation + 1.
    RotateRawResults,
    /// Delete scanner pods and the result server.
    CleanupWorkloads,
    /// Increment the raw-results run index before relaunching.
    BumpRunIndex,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: ScanPhase,
    pub actions: Vec<Action>,
}

impl Transition {
    fn stay(phase: ScanPhase, actions: Vec<Action>) -> Self {
        Transition {
            next: phase,
            actions,
        }
    }
}

/// Maps scanner exit codes to a scan result: 0 is compliant, 2 is a clean
/// run with failures, anything else is an error.
pub fn result_from_exit_codes(codes: &[i32]) -> ScanResult {
    if codes.is_empty() {
        return ScanResult::Error;
    }
    let mut result = ScanResult::Compliant;
    for code in codes {
        match code {
            0 => {}
            2 => {
                if result == ScanResult::Compliant {
                    result = ScanResult::NonCompliant;
                }
            }
            _ => return ScanResult::Error,
        }
    }
    result
}

/// One step of the state machine. Strictly forward except Done -> Launching
/// on rescan.
pub fn step(phase: ScanPhase, obs: &Observed) -> Transition {
    // Timeouts short-circuit every non-terminal phase.
    if obs.timed_out && phase != ScanPhase::Done {
        return Transition {
            next: ScanPhase::Done,
            actions: vec![
                Action::SetTimeoutCondition,
                Action::RecordResult(
                    ScanResult::Error,
                    Some(format!("{} phase timed out", phase.as_str())),
                ),
                Action::CleanupWorkloads,
            ],
        };
    }

    match phase {
        ScanPhase::Pending => {
            if let Some(msg) = &obs.spec_error {
                return Transition {
                    next: ScanPhase::Done,
                    actions: vec![Action::RecordResult(ScanResult::Error, Some(msg.clone()))],
                };
            }
            let mut actions = Vec::new();
            if !obs.pvc_bound {
                actions.push(Action::CreatePvc);
            }
            if obs.needs_result_server && !obs.result_server_ready {
                actions.push(Action::CreateResultServer);
            }
            let ready = obs.tailoring_ready
                && obs.pvc_bound
                && (!obs.needs_result_server || obs.result_server_ready);
            if ready {
                Transition {
                    next: ScanPhase::Launching,
                    actions,
                }
            } else {
                Transition::stay(ScanPhase::Pending, actions)
            }
        }

        ScanPhase::Launching => {
            if obs.workload_created {
                Transition {
                    next: ScanPhase::Running,
                    actions: Vec::new(),
                }
            } else {
                Transition::stay(ScanPhase::Launching, vec![Action::CreateScannerWorkload])
            }
        }

        ScanPhase::Running => {
            if let Some(reason) = &obs.pod_failure {
                return Transition {
                    next: ScanPhase::Done,
                    actions: vec![
                        Action::RecordResult(ScanResult::Error, Some(reason.clone())),
                        Action::CleanupWorkloads,
                    ],
                };
            }
            if obs.pods_done {
                Transition {
                    next: ScanPhase::Aggregating,
                    actions: Vec::new(),
                }
            } else {
                Transition::stay(ScanPhase::Running, Vec::new())
            }
        }

        ScanPhase::Aggregating => {
            if obs.aggregation_done {
                Transition {
                    next: ScanPhase::Done,
                    actions: vec![
                        Action::RecordResult(result_from_exit_codes(&obs.exit_codes), None),
                        Action::RotateRawResults,
                        Action::CleanupWorkloads,
                    ],
                }
            } else {
                Transition::stay(ScanPhase::Aggregating, vec![Action::CreateAggregator])
            }
        }

        ScanPhase::Done => {
            if obs.rescan_requested {
                Transition {
                    next: ScanPhase::Launching,
                    actions: vec![Action::BumpRunIndex],
                }
            } else {
                Transition::stay(ScanPhase::Done, Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_pending() -> Observed {
        Observed {
            tailoring_ready: true,
            pvc_bound: true,
            needs_result_server: true,
            result_server_ready: true,
            ..Default::default()
        }
    }

    #[test]
    fn pending_waits_for_pvc_and_result_server() {
        let obs = Observed {
            tailoring_ready: true,
            needs_result_server: true,
            ..Default::default()
        };
        let t = step(ScanPhase::Pending, &obs);
        assert_eq!(t.next, ScanPhase::Pending);
        assert_eq!(t.actions, vec![Action::CreatePvc, Action::CreateResultServer]);
    }

    #[test]
    fn pending_advances_once_preconditions_hold() {
        let t = step(ScanPhase::Pending, &ready_pending());
        assert_eq!(t.next, ScanPhase::Launching);
        assert!(t.actions.is_empty());
    }

    #[test]
    fn cel_scans_skip_the_result_server_precondition() {
        let obs = Observed {
            tailoring_ready: true,
            pvc_bound: true,
            needs_result_server: false,
            ..Default::default()
        };
        assert_eq!(step(ScanPhase::Pending, &obs).next, ScanPhase::Launching);
    }

    #[test]
    fn invalid_spec_goes_straight_to_done_error() {
        let obs = Observed {
            spec_error: Some("mixed rule kinds".into()),
            ..Default::default()
        };
        let t = step(ScanPhase::Pending, &obs);
        assert_eq!(t.next, ScanPhase::Done);
        assert_eq!(
            t.actions,
            vec![Action::RecordResult(
                ScanResult::Error,
                Some("mixed rule kinds".into())
            )]
        );
    }

    #[test]
    fn launching_creates_the_workload_then_runs() {
        let t = step(ScanPhase::Launching, &Observed::default());
        assert_eq!(t.next, ScanPhase::Launching);
        assert_eq!(t.actions, vec![Action::CreateScannerWorkload]);

        let obs = Observed {
            workload_created: true,
            ..Default::default()
        };
        assert_eq!(step(ScanPhase::Launching, &obs).next, ScanPhase::Running);
    }

    #[test]
    fn unrecoverable_pod_failure_short_circuits_to_error() {
        let obs = Observed {
            pod_failure: Some("ImagePullBackOff on node worker-1".into()),
            ..Default::default()
        };
        let t = step(ScanPhase::Running, &obs);
        assert_eq!(t.next, ScanPhase::Done);
        assert!(t.actions.contains(&Action::CleanupWorkloads));
        assert!(matches!(
            &t.actions[0],
            Action::RecordResult(ScanResult::Error, Some(msg)) if msg.contains("ImagePullBackOff")
        ));
    }

    #[test]
    fn finished_pods_move_to_aggregating() {
        let obs = Observed {
            pods_done: true,
            ..Default::default()
        };
        assert_eq!(step(ScanPhase::Running, &obs).next, ScanPhase::Aggregating);
    }

    #[test]
    fn aggregation_completion_records_result_rotation_and_cleanup() {
        let obs = Observed {
            aggregation_done: true,
            exit_codes: vec![0, 2, 0],
            ..Default::default()
        };
        let t = step(ScanPhase::Aggregating, &obs);
        assert_eq!(t.next, ScanPhase::Done);
        assert_eq!(
            t.actions,
            vec![
                Action::RecordResult(ScanResult::NonCompliant, None),
                Action::RotateRawResults,
                Action::CleanupWorkloads,
            ]
        );
    }

    #[test]
    fn timeout_overrides_any_phase() {
        for phase in [
            ScanPhase::Pending,
            ScanPhase::Launching,
            ScanPhase::Running,
            ScanPhase::Aggregating,
        ] {
            let obs = Observed {
                timed_out: true,
                ..ready_pending()
            };
            let t = step(phase, &obs);
            assert_eq!(t.next, ScanPhase::Done);
            assert_eq!(t.actions[0], Action::SetTimeoutCondition);
        }
        // A Done scan can't time out.
        let obs = Observed {
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(step(ScanPhase::Done, &obs).next, ScanPhase::Done);
    }

    #[test]
    fn rescan_restarts_from_done_with_a_fresh_index() {
        let obs = Observed {
            rescan_requested: true,
            ..Default::default()
        };
        let t = step(ScanPhase::Done, &obs);
        assert_eq!(t.next, ScanPhase::Launching);
        assert_eq!(t.actions, vec![Action::BumpRunIndex]);
    }

    #[test]
    fn exit_code_contract() {
        assert_eq!(result_from_exit_codes(&[0, 0]), ScanResult::Compliant);
        assert_eq!(result_from_exit_codes(&[0, 2]), ScanResult::NonCompliant);
        assert_eq!(result_from_exit_codes(&[2, 1]), ScanResult::Error);
        assert_eq!(result_from_exit_codes(&[-1]), ScanResult::Error);
        assert_eq!(result_from_exit_codes(&[]), ScanResult::Error);
    }
}
