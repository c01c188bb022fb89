use chrono::Utc;

fn main() {
    // Stamped into `handoff --version` so operators can tell pipeline builds apart.
    let stamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
    println!("cargo:rustc-env=BUILD_TIMESTAMP={stamp}");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/");
}
