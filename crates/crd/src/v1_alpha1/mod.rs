// Copyright 2026 Compliance Operator Authors
// SPDX-License-Identifier: Apache-2.0

//! v1alpha1 CRD resources

pub mod catalog;
pub mod check_result;
pub mod conditions;
pub mod machine_config;
pub mod remediation;
pub mod scan;
pub mod suite;
pub mod tailored_profile;

pub use catalog::{
    DataStreamStatusType, Profile, ProfileBundle, ProfileBundleSpec, ProfileBundleStatus,
    ProfileSpec, Rule, RuleReference, RuleSeverity, RuleSpec, RuleType, Variable, VariableSpec,
    VariableType, PROFILE_BUNDLE_FINALIZER,
};
pub use check_result::{CheckStatus, ComplianceCheckResult, ComplianceCheckResultSpec};
pub use conditions::{Condition, ConditionStatus, Conditions};
pub use machine_config::{
    MachineConfig, MachineConfigPool, MachineConfigPoolStatus, PoolSelector,
};
pub use remediation::{
    ComplianceRemediation, ComplianceRemediationSpec, ComplianceRemediationStatus,
    RemediationApplicationState, RemediationPayload, RemediationType,
};
pub use scan::{
    ComplianceScan, ComplianceScanSpec, ComplianceScanStatus, RawResultStorageSpec, ScanPhase,
    ScanResult, ScanType, ScannerType, SCAN_FINALIZER,
};
pub use suite::{
    ComplianceSuite, ComplianceSuiteSpec, ComplianceSuiteStatus, ComplianceScanSpecWrapper,
    ProfileReference, ScanSetting, ScanSettingBinding, ScanSettingBindingSpec,
    ScanSettingBindingStatus, ScanSettingSpec, ScanStatusSummary, SettingsReference,
};
pub use tailored_profile::{
    CustomRule, CustomRuleInput, CustomRulePhase, CustomRuleSpec, CustomRuleStatus, OutputRef,
    TailoredProfile, TailoredProfileSpec, TailoredProfileState, TailoredProfileStatus,
    VariableValueSpec,
};
