//! # Forwardflow Command Implementation
//!
//! Flows a build of a component repository into the VMR. The repository
//! must already be cloned locally and contain the build's commit.

use anyhow::Result;

use vmr_codeflow::cancellation::CancellationToken;
use vmr_codeflow::codeflow::forward::ForwardFlower;
use vmr_codeflow::vmr_info::VmrInfo;

use super::flow::{report, Engine, FlowArgs};

/// Execute the `forwardflow` command.
pub fn execute(vmr_info: &VmrInfo, args: FlowArgs) -> Result<()> {
    let engine = Engine::new(vmr_info, &args)?;
    let options = engine.options(&args)?;

    let flower = ForwardFlower::new(
        engine.vmr_info.clone(),
        engine.git.clone(),
        engine.fs.clone(),
        engine.tracker.clone(),
        engine.patches.clone(),
        engine.writer.clone(),
    );
    let result = flower.flow_forward(&options, &args.repo, &CancellationToken::none())?;
    report(&result)
}
