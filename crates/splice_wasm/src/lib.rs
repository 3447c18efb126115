//! WASM bindings for multiple-shooting training.

mod problem;
mod runner;

pub use problem::WasmShootingProblem;
pub use runner::WasmTrainingRunner;

use problem::{js_error, serialize};
use splice_core::shooting::{partition, Group};
use wasm_bindgen::prelude::*;

fn groups_for(len: usize, group_size: usize) -> anyhow::Result<Vec<Group>> {
    Ok(partition(len, group_size)?)
}

/// Overlapping groups for a dataset of `len` samples.
#[wasm_bindgen]
pub fn partition_groups(len: usize, group_size: usize) -> Result<JsValue, JsValue> {
    let groups = groups_for(len, group_size).map_err(js_error)?;
    serialize(&groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_like_the_core() {
        let groups = groups_for(30, 3).unwrap();
        assert_eq!(groups.len(), 15);
        assert_eq!((groups[14].start, groups[14].end), (28, 29));

        let err = groups_for(5, 1).unwrap_err();
        assert!(format!("{err:#}").contains("group_size"));
    }
}
