//! Prints the ProxyGroup CRD manifest as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > deploy/crds/proxygroup.yaml`

use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = crds::ProxyGroup::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
