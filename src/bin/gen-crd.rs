use kube::CustomResourceExt;
use rullaus::crd::machine_deployment::MachineDeployment;
use rullaus::crd::machine_set::MachineSet;

fn main() {
    // Emit both CRDs as a JSON stream (kubectl accepts JSON)
    for crd in [MachineDeployment::crd(), MachineSet::crd()] {
        let json = serde_json::to_string_pretty(&crd).expect("failed to serialize CRD to JSON");
        println!("{json}");
    }
}
