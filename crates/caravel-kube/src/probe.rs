//! Readiness classification for probed objects
//!
//! A probe GETs one object and folds whatever status the cluster reports
//! into the small [`ObjectState`] set the task state machine understands.
//! Classification is pure so it can be tested from JSON fixtures.

use caravel_core::Kind;
use kube::api::DynamicObject;
use serde_json::Value;

use crate::api::ObjectState;

/// Classify a probed object.
///
/// `obj` is `None` when the GET returned 404.
pub fn classify(kind: Kind, obj: Option<&DynamicObject>) -> ObjectState {
    let Some(obj) = obj else {
        return ObjectState::Missing;
    };

    match kind {
        Kind::Deployment | Kind::StatefulSet => {
            let desired = int_at(&obj.data, &["spec", "replicas"]).unwrap_or(1);
            let ready = int_at(&obj.data, &["status", "readyReplicas"]).unwrap_or(0);
            if ready >= desired {
                ObjectState::Ready
            } else {
                ObjectState::Init
            }
        }
        Kind::DaemonSet => {
            let desired = int_at(&obj.data, &["status", "desiredNumberScheduled"]).unwrap_or(0);
            let ready = int_at(&obj.data, &["status", "numberReady"]).unwrap_or(0);
            if desired > 0 && ready >= desired {
                ObjectState::Ready
            } else {
                ObjectState::Init
            }
        }
        Kind::Job => {
            let completions = int_at(&obj.data, &["spec", "completions"]).unwrap_or(1);
            let backoff_limit = int_at(&obj.data, &["spec", "backoffLimit"]).unwrap_or(6);
            let succeeded = int_at(&obj.data, &["status", "succeeded"]).unwrap_or(0);
            let failed = int_at(&obj.data, &["status", "failed"]).unwrap_or(0);
            if succeeded >= completions {
                ObjectState::Done
            } else if failed > backoff_limit {
                ObjectState::Failed
            } else {
                ObjectState::Init
            }
        }
        // Passive kinds are done the moment they exist.
        _ => ObjectState::Done,
    }
}

fn int_at(value: &Value, path: &[&str]) -> Option<i64> {
    let mut cur = value;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(json: &str) -> DynamicObject {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_absent_is_missing() {
        assert_eq!(classify(Kind::Deployment, None), ObjectState::Missing);
        assert_eq!(classify(Kind::Service, None), ObjectState::Missing);
    }

    #[test]
    fn test_deployment_ready() {
        let o = obj(
            r#"{"apiVersion":"apps/v1","kind":"Deployment",
                "metadata":{"name":"web"},
                "spec":{"replicas":2},
                "status":{"readyReplicas":2}}"#,
        );
        assert_eq!(classify(Kind::Deployment, Some(&o)), ObjectState::Ready);
    }

    #[test]
    fn test_deployment_still_rolling_out() {
        let o = obj(
            r#"{"apiVersion":"apps/v1","kind":"Deployment",
                "metadata":{"name":"web"},
                "spec":{"replicas":3},
                "status":{"readyReplicas":1}}"#,
        );
        assert_eq!(classify(Kind::Deployment, Some(&o)), ObjectState::Init);
    }

    #[test]
    fn test_deployment_defaults_to_one_replica() {
        let o = obj(
            r#"{"apiVersion":"apps/v1","kind":"Deployment",
                "metadata":{"name":"web"},
                "spec":{},
                "status":{"readyReplicas":1}}"#,
        );
        assert_eq!(classify(Kind::Deployment, Some(&o)), ObjectState::Ready);
    }

    #[test]
    fn test_job_states() {
        let done = obj(
            r#"{"apiVersion":"batch/v1","kind":"Job","metadata":{"name":"j"},
                "spec":{"completions":1},"status":{"succeeded":1}}"#,
        );
        assert_eq!(classify(Kind::Job, Some(&done)), ObjectState::Done);

        let failed = obj(
            r#"{"apiVersion":"batch/v1","kind":"Job","metadata":{"name":"j"},
                "spec":{"backoffLimit":2},"status":{"failed":3}}"#,
        );
        assert_eq!(classify(Kind::Job, Some(&failed)), ObjectState::Failed);

        let running = obj(
            r#"{"apiVersion":"batch/v1","kind":"Job","metadata":{"name":"j"},
                "spec":{},"status":{"active":1}}"#,
        );
        assert_eq!(classify(Kind::Job, Some(&running)), ObjectState::Init);
    }

    #[test]
    fn test_daemonset_needs_scheduled_pods() {
        let empty = obj(
            r#"{"apiVersion":"apps/v1","kind":"DaemonSet","metadata":{"name":"d"},
                "spec":{},"status":{}}"#,
        );
        assert_eq!(classify(Kind::DaemonSet, Some(&empty)), ObjectState::Init);

        let ready = obj(
            r#"{"apiVersion":"apps/v1","kind":"DaemonSet","metadata":{"name":"d"},
                "spec":{},"status":{"desiredNumberScheduled":2,"numberReady":2}}"#,
        );
        assert_eq!(classify(Kind::DaemonSet, Some(&ready)), ObjectState::Ready);
    }

    #[test]
    fn test_passive_kind_is_done_when_present() {
        let o = obj(
            r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"c"},"data":{}}"#,
        );
        assert_eq!(classify(Kind::ConfigMap, Some(&o)), ObjectState::Done);
    }
}
