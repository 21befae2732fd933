fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    // Migrations are embedded at compile time, so edits must trigger a rebuild.
    println!("cargo:rerun-if-changed=migrations");
}
