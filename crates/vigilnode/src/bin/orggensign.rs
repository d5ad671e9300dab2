use clap::Parser;

use vigilnode::orgtool::{run, OrgToolArgs};

fn main() {
    let args = OrgToolArgs::parse();
    std::process::exit(run("orggensign", args, false));
}
