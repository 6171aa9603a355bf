use std::collections::BTreeSet;

use super::Shim;

const PLOTTING_MARKERS: &[&str] = &["matplotlib", "plt."];

/// Shims `source` needs before it runs. Always contains [`Shim::Basic`].
pub fn required_shims(source: &str) -> BTreeSet<Shim> {
    let mut shims = BTreeSet::from([Shim::Basic]);
    if PLOTTING_MARKERS.iter().any(|m| source.contains(m)) {
        shims.insert(Shim::Matplotlib);
    }
    shims
}
