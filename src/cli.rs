//! CLI argument parsing using clap derive

use clap::{ArgAction, Parser, Subcommand};
use olmappy::constants::DEFAULT_EXPORT_FILE;
use olmappy::utils::parse_datetime;
use olmappy::{MapFilter, MapType, Settings, StringMatch};
use std::path::PathBuf;

/// Keep a local mirror of the Overload map server in sync
#[derive(Parser, Debug)]
#[command(name = "olmappy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file to load (default: olmappy.json in the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override a configuration option, e.g. `-s mapPath /srv/maps`
    #[arg(
        short = 's',
        long = "set",
        global = true,
        num_args = 2,
        value_names = ["NAME", "VALUE"],
        action = ArgAction::Append
    )]
    pub set: Vec<String>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// File written by export-list
    #[arg(short = 'E', long, global = true, default_value = DEFAULT_EXPORT_FILE)]
    pub export_file: PathBuf,

    /// File read by hide-import
    #[arg(short = 'I', long, global = true, default_value = DEFAULT_EXPORT_FILE)]
    pub import_file: PathBuf,

    /// Invert the hidden state read by hide-import
    #[arg(long, global = true)]
    pub reverse: bool,

    /// The command to run (default: update)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Map selection flags shared by every command
#[derive(clap::Args, Debug, Default)]
pub struct FilterArgs {
    /// Level name contains NAME
    #[arg(short = 'n', long = "name", global = true, value_name = "NAME")]
    pub names: Vec<String>,

    /// Level name is exactly NAME
    #[arg(short = 'N', long = "exact-name", global = true, value_name = "NAME")]
    pub exact_names: Vec<String>,

    /// File name contains FILE
    #[arg(short = 'f', long = "filename", global = true, value_name = "FILE")]
    pub filenames: Vec<String>,

    /// File name is exactly FILE
    #[arg(short = 'F', long = "exact-filename", global = true, value_name = "FILE")]
    pub exact_filenames: Vec<String>,

    /// Level type: SP, CM or MP
    #[arg(short = 't', long = "type", global = true, value_name = "TYPE")]
    pub types: Vec<MapType>,

    /// Modified before this time
    #[arg(short = 'b', long = "time-before", global = true, value_parser = parse_datetime, value_name = "TIME")]
    pub before: Option<f64>,

    /// Modified at or after this time
    #[arg(short = 'a', long = "time-after", global = true, value_parser = parse_datetime, value_name = "TIME")]
    pub after: Option<f64>,

    /// Only hidden maps
    #[arg(short = 'H', long, global = true)]
    pub hidden: bool,

    /// Only visible maps
    #[arg(short = 'U', long, global = true)]
    pub unhidden: bool,

    /// Allow hide/unhide without any other filter
    #[arg(short = 'A', long, global = true)]
    pub all: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Import unindexed local files, then download new and updated maps
    Update,

    /// Add maps already in the mirror directories to the index
    Import,

    /// List indexed maps
    #[command(alias = "listlocal")]
    ListLocal,

    /// List maps on the server
    #[command(alias = "listremote")]
    ListRemote,

    /// List visible files that are not indexed
    #[command(alias = "listignored")]
    ListIgnored,

    /// Move the selected maps into the hidden directory
    Hide,

    /// Move the selected maps back into the mirror directory
    Unhide,

    /// Write the selected maps as a JSON list
    #[command(alias = "exportlist")]
    ExportList,

    /// Hide and unhide maps as recorded in an exported list
    #[command(alias = "hideimport")]
    HideImport,

    /// Print the effective configuration as JSON
    #[command(alias = "showconfig")]
    ShowConfig,

    /// Write the effective configuration to the config file
    #[command(alias = "writeconfig")]
    WriteConfig,
}

impl Cli {
    /// `--set` values as name/value pairs
    pub fn overrides(&self) -> Vec<(String, String)> {
        self.set
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), pair[1].clone()))
            .collect()
    }
}

impl FilterArgs {
    /// Build the map filter, taking case sensitivity from the settings
    pub fn build(&self, settings: &Settings) -> MapFilter {
        let mut filter = MapFilter::new()
            .case_sensitivity(settings.filter_case_sensitive, settings.filename_case_sensitive)
            .only_hidden(self.hidden)
            .only_visible(self.unhidden)
            .apply_to_all(self.all);
        for name in &self.names {
            filter = filter.name(StringMatch::contains(name.as_str()));
        }
        for name in &self.exact_names {
            filter = filter.name(StringMatch::exact(name.as_str()));
        }
        for name in &self.filenames {
            filter = filter.filename(StringMatch::contains(name.as_str()));
        }
        for name in &self.exact_filenames {
            filter = filter.filename(StringMatch::exact(name.as_str()));
        }
        for t in &self.types {
            filter = filter.map_type(*t);
        }
        if let Some(ts) = self.before {
            filter = filter.before(ts);
        }
        if let Some(ts) = self.after {
            filter = filter.after(ts);
        }
        filter
    }
}
