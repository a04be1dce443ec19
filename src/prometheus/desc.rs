use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

use super::error::{Error, Result};
use super::labels::{is_valid_label_name, is_valid_metric_name, LabelSet};

/// Options shared by every metric family.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Opts {
    // Namespace, Subsystem, and Name are joined with "_" to form the
    // fully-qualified name. Only Name is mandatory.
    pub namespace: String,
    pub subsystem: String,
    pub name: String,

    pub help: String,

    // Fixed labels attached to every series of this metric, in name order.
    pub const_labels: BTreeMap<String, String>,
}

impl Opts {
    pub fn new(name: &str, help: &str) -> Self {
        Opts {
            name: name.to_string(),
            help: help.to_string(),
            ..Default::default()
        }
    }

    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn subsystem(mut self, subsystem: &str) -> Self {
        self.subsystem = subsystem.to_string();
        self
    }

    pub fn const_label(mut self, name: &str, value: &str) -> Self {
        self.const_labels.insert(name.to_string(), value.to_string());
        self
    }

    pub fn fq_name(&self) -> String {
        build_fq_name(&self.namespace, &self.subsystem, &self.name)
    }
}

pub fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }

    let mut fq_name = String::new();
    if !namespace.is_empty() {
        fq_name.push_str(namespace);
        fq_name.push('_');
    }
    if !subsystem.is_empty() {
        fq_name.push_str(subsystem);
        fq_name.push('_');
    }
    fq_name.push_str(name);
    fq_name
}

/// Validated, immutable metadata of one metric family.
#[derive(Debug, Clone)]
pub struct Desc {
    pub fq_name: String,
    pub help: String,
    pub const_labels: LabelSet,
    pub variable_labels: Vec<String>,
}

impl Desc {
    /// `reserved` lists label names the metric kind uses itself ("le" for
    /// histograms, "quantile" for summaries); `kind` is used in the error.
    pub fn new(
        opts: &Opts,
        variable_labels: &[&str],
        reserved: &[&str],
        kind: &'static str,
    ) -> Result<Self> {
        let fq_name = opts.fq_name();
        if !is_valid_metric_name(&fq_name) {
            return Err(Error::InvalidMetricName(fq_name));
        }

        let mut seen = HashSet::new();
        let names = opts
            .const_labels
            .keys()
            .map(String::as_str)
            .chain(variable_labels.iter().copied());
        for name in names {
            if !is_valid_label_name(name) {
                return Err(Error::InvalidLabelName(name.to_string()));
            }
            if reserved.contains(&name) {
                return Err(Error::ReservedLabelName {
                    label: name.to_string(),
                    kind,
                });
            }
            if !seen.insert(name) {
                return Err(Error::DuplicateLabelName(name.to_string()));
            }
        }

        Ok(Desc {
            fq_name,
            help: opts.help.clone(),
            const_labels: LabelSet::new(opts.const_labels.clone())?,
            variable_labels: variable_labels.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fq_name() {
        assert_eq!(build_fq_name("", "", ""), "");
        assert_eq!(build_fq_name("ns", "", "requests"), "ns_requests");
        assert_eq!(build_fq_name("ns", "http", "requests"), "ns_http_requests");
        assert_eq!(build_fq_name("ns", "http", ""), "");
    }

    #[test]
    fn test_desc_validation() {
        let opts = Opts::new("latency_seconds", "Request latency.").const_label("env", "prod");

        let desc = Desc::new(&opts, &["path"], &["le"], "histogram").unwrap();
        assert_eq!(desc.fq_name, "latency_seconds");
        assert_eq!(desc.const_labels.get("env"), Some("prod"));

        assert_eq!(
            Desc::new(&opts, &["le"], &["le"], "histogram").unwrap_err(),
            Error::ReservedLabelName { label: "le".into(), kind: "histogram" }
        );
        assert_eq!(
            Desc::new(&opts, &["env"], &[], "gauge").unwrap_err(),
            Error::DuplicateLabelName("env".into())
        );
        assert_eq!(
            Desc::new(&Opts::new("", ""), &[], &[], "gauge").unwrap_err(),
            Error::InvalidMetricName("".into())
        );
    }

    #[test]
    fn test_opts_deserialize() {
        let opts: Opts = serde_json::from_str(
            r#"{"namespace": "app", "name": "jobs", "const_labels": {"team": "core"}}"#,
        )
        .unwrap();
        assert_eq!(opts.fq_name(), "app_jobs");
        assert_eq!(opts.const_labels.get("team").map(String::as_str), Some("core"));
        assert!(opts.help.is_empty());
    }
}
