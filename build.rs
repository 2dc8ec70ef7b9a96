//! Build script for framegfx.
//!
//! Prints feature notes for users integrating framegfx into their projects.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_VULKAN");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_TRACY");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DIAGNOSTICS");

    let vulkan_enabled = env::var("CARGO_FEATURE_VULKAN").is_ok();
    let tracy_enabled = env::var("CARGO_FEATURE_TRACY").is_ok();
    let diagnostics_enabled = env::var("CARGO_FEATURE_DIAGNOSTICS").is_ok();
    let is_release = env::var("PROFILE").map_or(false, |profile| profile == "release");

    if vulkan_enabled {
        emit_info("Vulkan backend enabled");
        emit_note("Create a surface from VulkanInstance::raw() and pass it to");
        emit_note("  VulkanAdapter::with_surface before creating a presenting device.");
    }

    if tracy_enabled {
        emit_info("Tracy integration enabled (frame marks, device memory plot)");
    }

    if diagnostics_enabled && is_release {
        emit_warning("'diagnostics' feature enabled in a release build");
        emit_note("GX diagnostics will be printed to stderr.");
    }

    if env::var("TARGET").map_or(false, |target| target.contains("wasm")) {
        emit_warning("WebAssembly target detected");
        emit_note("Only the software backend is available on this target.");
    }
}

fn emit_info(msg: &str) {
    println!("cargo:warning=[framegfx] {}", msg);
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[framegfx]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[framegfx] warning: {}", msg);
}
