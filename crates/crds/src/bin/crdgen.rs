//! Prints every fabric CRD as multi-document YAML
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/fabric.yaml`

fn main() -> Result<(), serde_yaml::Error> {
    for crd in crds::all_crds() {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
