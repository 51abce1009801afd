use anyhow::Result;

use vergen_gitcl::{BuildBuilder, Emitter, GitclBuilder, RustcBuilder};

// Build metadata logged by both binaries at startup. Outside a git checkout
// the git values fall back to vergen's defaults.
fn main() -> Result<()> {
    let build = BuildBuilder::all_build()?;
    let git = GitclBuilder::all_git()?;
    let rustc = RustcBuilder::all_rustc()?;

    Emitter::default()
        .add_instructions(&build)?
        .add_instructions(&git)?
        .add_instructions(&rustc)?
        .emit()
}
