fn main() {
    println!("cargo:rerun-if-changed=schema/orders.graphql");
    dynaform_codegen::generate_from_schema(
        "schema/orders.graphql",
        &format!("{}/models.rs", std::env::var("OUT_DIR").unwrap()),
    )
    .expect("Code generation failed");
}
