//! # Backflow Command Implementation
//!
//! Flows a VMR build back into a local clone of a component repository.
//! The VMR is checked out at the build's commit first.

use anyhow::Result;

use vmr_codeflow::cancellation::CancellationToken;
use vmr_codeflow::codeflow::backflow::Backflower;
use vmr_codeflow::vmr_info::VmrInfo;

use super::flow::{report, Engine, FlowArgs};

/// Execute the `backflow` command.
pub fn execute(vmr_info: &VmrInfo, args: FlowArgs) -> Result<()> {
    let engine = Engine::new(vmr_info, &args)?;
    let options = engine.options(&args)?;

    let flower = Backflower::new(
        engine.vmr_info.clone(),
        engine.git.clone(),
        engine.fs.clone(),
        engine.tracker.clone(),
        engine.patches.clone(),
        engine.writer.clone(),
    );
    let result = flower.flow_back(&options, &args.repo, &CancellationToken::none())?;
    report(&result)
}
