//! Build script for dfw-analyzer
//!
//! Embeds build-time information (git commit, dirty status, build timestamp)
//! used by the `--version` output.

fn main() {
    // Re-run build if the log filter default changes for packagers
    println!("cargo:rerun-if-env-changed=DFW_ANALYZER_LOG");

    // Embed git commit, build time, and dirty status
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build info");
}
