use super::*;

#[test]
fn registered_metrics_should_appear_in_exposition() {
    register_custom_metrics();
    register_custom_metrics();
    APPLY_FAILURES.with_label_values(&["malformed"]).inc();
    SNAPSHOTS_TAKEN.inc();

    let text = gather_text();
    assert!(text.contains("kv_apply_failures"));
    assert!(text.contains("kv_snapshots_taken"));
}
