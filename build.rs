//! Stamps `pt-render` with its build time.
//!
//! `SOURCE_DATE_EPOCH` pins the stamp for reproducible builds.

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

fn build_time() -> OffsetDateTime {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .unwrap_or_else(OffsetDateTime::now_utc)
}

fn main() {
    let t = build_time();
    let t = t.replace_nanosecond(0).unwrap_or(t);
    let stamp = t.format(&Rfc3339).unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=PATHTRACER_BUILD_STAMP={stamp}");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");
    println!("cargo:rerun-if-changed=build.rs");
}
