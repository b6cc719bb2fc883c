//! Auth event counters, recorded through the `metrics` facade and exported
//! by the Prometheus recorder installed in `press_core::observability`.

use metrics::counter;

pub fn record_login(outcome: &'static str) {
    counter!("auth_login_total", "outcome" => outcome).increment(1);
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("auth_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_token_consumed(purpose: &'static str) {
    counter!("auth_tokens_consumed_total", "purpose" => purpose).increment(1);
}

pub fn record_authz_decision(allowed: bool) {
    let decision = if allowed { "allow" } else { "deny" };
    counter!("authz_decisions_total", "decision" => decision).increment(1);
}
