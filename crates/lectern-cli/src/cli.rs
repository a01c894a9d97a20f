use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern: song libraries, merged and synchronized",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding library stores and libraries.json
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Settings file (toml)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage configured libraries
    Library(LibraryArgs),
    /// List, search, or import songs
    Song(SongArgs),
    /// Manage songs lists
    List(ListArgs),
    /// Synchronize every library that has a remote
    Sync,
}

#[derive(Args)]
pub struct LibraryArgs {
    #[command(subcommand)]
    pub action: LibraryAction,
}

#[derive(Subcommand)]
pub enum LibraryAction {
    /// Show every configured library
    List,
    /// Configure a new library
    Add(AddLibraryArgs),
    Enable { id: String },
    Disable { id: String },
    /// Remove a library and erase its local data
    Remove { id: String },
}

#[derive(Args)]
pub struct AddLibraryArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long)]
    pub remote: Option<String>,
    #[arg(long)]
    pub writable: bool,
}

#[derive(Args)]
pub struct SongArgs {
    #[command(subcommand)]
    pub action: SongAction,
}

#[derive(Subcommand)]
pub enum SongAction {
    /// List songs of every enabled library
    List(SongListArgs),
    /// Import songs from a JSON array file
    Import(ImportArgs),
}

#[derive(Args)]
pub struct SongListArgs {
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub page_size: Option<usize>,
}

#[derive(Args)]
pub struct ImportArgs {
    #[arg(long)]
    pub library: String,
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ListArgs {
    #[command(subcommand)]
    pub action: ListAction,
}

#[derive(Subcommand)]
pub enum ListAction {
    /// Show songs lists of every enabled library
    List,
}
