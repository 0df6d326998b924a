//! Labels, finalizers and object names shared by the Devbox and its children.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;

/// Finalizer placed on the Devbox and on every child object
pub const FINALIZER_NAME: &str = "devbox.sealos.io/finalizer";

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

pub const DEFAULT_MANAGED_BY: &str = "sealos";
pub const DEVBOX_PART_OF: &str = "devbox";

/// Label selector identifying every child object of one Devbox
pub type Labels = BTreeMap<String, String>;

pub fn recommended_labels(devbox_name: &str) -> Labels {
    BTreeMap::from([
        (LABEL_NAME.to_string(), devbox_name.to_string()),
        (LABEL_MANAGED_BY.to_string(), DEFAULT_MANAGED_BY.to_string()),
        (LABEL_PART_OF.to_string(), DEVBOX_PART_OF.to_string()),
    ])
}

/// Render labels as a `labelSelector` query value
pub fn selector_string(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when every selector entry is present on `labels`
pub fn selector_matches(selector: &Labels, labels: Option<&Labels>) -> bool {
    let Some(labels) = labels else {
        return selector.is_empty();
    };
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Lowercase alphanumeric string of length `n`
pub fn random_suffix(n: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(n)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

/// Pod name for a new attempt: `<devbox>-<5 random chars>`
pub fn pod_name(devbox_name: &str) -> String {
    format!("{}-{}", devbox_name, random_suffix(5))
}

pub fn service_name(devbox_name: &str) -> String {
    format!("{}-svc", devbox_name)
}

pub fn secret_name(devbox_name: &str) -> String {
    devbox_name.to_string()
}
