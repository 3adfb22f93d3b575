pub mod args;

use clap::Parser;

pub use args::{AmbiguousPolicy, Arguments, SelectionMode};

pub fn parse() -> Arguments {
    Arguments::parse()
}
