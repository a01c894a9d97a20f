use std::sync::Arc;

use anyhow::{anyhow, Context};
use colored::Colorize;

use lectern_items::{to_partial_list, ItemsManager, PageStream};
use lectern_library::{
    ConfigSource, FileStoreOpener, JsonFileConfigSource, Libraries, LibraryConfig, Song,
    SongsList, StoreOpener,
};

use crate::cli::*;
use crate::settings::Settings;

const DEFAULT_SETTINGS_FILE: &str = "lectern.toml";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(|| DEFAULT_SETTINGS_FILE.into());
    let mut settings = Settings::load(&settings_path)?;
    if let Some(dir) = cli.data_dir {
        settings.data_dir = dir;
    }

    let libraries = open_libraries(&settings).await?;
    let result = match cli.command {
        Command::Library(args) => cmd_library(&libraries, args.action).await,
        Command::Song(args) => cmd_song(&libraries, &settings, args.action).await,
        Command::List(args) => match args.action {
            ListAction::List => cmd_list_lists(&libraries, &settings).await,
        },
        Command::Sync => cmd_sync(&libraries).await,
    };
    libraries.dispose().await;
    result
}

async fn open_libraries(settings: &Settings) -> anyhow::Result<Libraries> {
    let source: Arc<dyn ConfigSource> =
        Arc::new(JsonFileConfigSource::new(settings.libraries_file()));
    let opener: Arc<dyn StoreOpener> = Arc::new(FileStoreOpener::new(&settings.data_dir));
    Libraries::load(source, opener)
        .await
        .with_context(|| format!("loading libraries from {}", settings.data_dir.display()))
}

async fn cmd_library(libraries: &Libraries, action: LibraryAction) -> anyhow::Result<()> {
    match action {
        LibraryAction::List => {
            let configs = libraries.configs().snapshot();
            if configs.is_empty() {
                println!("No libraries configured.");
            }
            for item in configs {
                print_library(&item.object);
            }
        }
        LibraryAction::Add(args) => {
            let config = LibraryConfig {
                remote_url: args.remote.unwrap_or_default(),
                readonly: !args.writable,
                ..LibraryConfig::named(args.name)
            };
            let added = libraries.add_library(config).await?;
            println!(
                "{} Added library {} ({})",
                "✓".green().bold(),
                added.object.display_name.bold(),
                added.object.id.dimmed()
            );
        }
        LibraryAction::Enable { id } => {
            libraries.set_enabled(&id, true).await?;
            println!("Enabled library {}", id.yellow());
        }
        LibraryAction::Disable { id } => {
            libraries.set_enabled(&id, false).await?;
            println!("Disabled library {}", id.yellow());
        }
        LibraryAction::Remove { id } => {
            libraries.remove_library(&id).await?;
            println!("{} Removed library {}", "✓".green(), id.yellow());
        }
    }
    Ok(())
}

fn print_library(config: &LibraryConfig) {
    let state = if config.enabled {
        "enabled".green()
    } else {
        "disabled".red()
    };
    let access = if config.readonly { "read-only" } else { "writable" };
    println!(
        "{}  {}  [{}, {}]",
        config.id.dimmed(),
        config.display_name.bold(),
        state,
        access
    );
    if config.remote_enabled {
        println!("  remote: {}", config.remote_url.blue());
    }
}

async fn cmd_song(
    libraries: &Libraries,
    settings: &Settings,
    action: SongAction,
) -> anyhow::Result<()> {
    match action {
        SongAction::List(args) => {
            let songs = libraries.songs();
            let pages = match &args.search {
                Some(text) => songs.search(
                    text,
                    Some(args.page_size.unwrap_or(settings.search_page_size)),
                ),
                None => songs.list(Some(args.page_size.unwrap_or(settings.page_size))),
            };
            let shown = print_pages(pages, |song: &Song| {
                if song.authors.is_empty() {
                    song.title.bold().to_string()
                } else {
                    format!("{}  {}", song.title.bold(), song.authors.join(", ").dimmed())
                }
            })
            .await?;
            if shown == 0 {
                println!("No songs.");
            }
        }
        SongAction::Import(args) => {
            let library = libraries
                .library(&args.library)
                .ok_or_else(|| anyhow!("no library with id {}", args.library))?;
            let text = std::fs::read_to_string(&args.file)
                .with_context(|| format!("reading {}", args.file.display()))?;
            let songs: Vec<Song> = serde_json::from_str(&text)
                .with_context(|| format!("parsing songs in {}", args.file.display()))?;
            let imported = library.import_songs(songs).await?;
            println!(
                "{} Imported {} songs into {}",
                "✓".green().bold(),
                imported.len(),
                library.config().display_name.bold()
            );
        }
    }
    Ok(())
}

async fn cmd_list_lists(libraries: &Libraries, settings: &Settings) -> anyhow::Result<()> {
    let pages = libraries.songs_lists().list(Some(settings.page_size));
    let shown = print_pages(pages, |list: &SongsList| {
        format!("{}  ({} songs)", list.title.bold(), list.songs.len())
    })
    .await?;
    if shown == 0 {
        println!("No songs lists.");
    }
    Ok(())
}

/// Print every item of `pages`, fetching one page at a time.
async fn print_pages<T, F>(pages: PageStream<T>, render: F) -> anyhow::Result<usize>
where
    T: lectern_items::Item,
    F: Fn(&T) -> String,
{
    let mut list = to_partial_list(pages).await?;
    let mut shown = 0;
    loop {
        for item in &list.items()[shown..] {
            println!("{}", render(&item.object));
        }
        shown = list.items().len();
        if !list.has_more() {
            return Ok(shown);
        }
        list = list.fetch_more().await?;
    }
}

async fn cmd_sync(libraries: &Libraries) -> anyhow::Result<()> {
    let summary = libraries.synchronize_all().await;
    if summary.synchronized.is_empty() && summary.failed.is_empty() {
        println!("No libraries to synchronize.");
        return Ok(());
    }
    for (id, report) in &summary.synchronized {
        println!(
            "{} {}  read {}, written {}",
            "✓".green(),
            id.yellow(),
            report.docs_read,
            report.docs_written
        );
    }
    for (id, error) in &summary.failed {
        println!("{} {}  {}", "✗".red(), id.yellow(), error);
    }
    if summary.is_success() {
        Ok(())
    } else {
        Err(anyhow!("{} libraries failed to synchronize", summary.failed.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::Path;

    fn settings(dir: &Path) -> Settings {
        Settings {
            data_dir: dir.to_path_buf(),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn library_commands_persist_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());

        let libraries = open_libraries(&settings).await.unwrap();
        let cli = Cli::try_parse_from(["lectern", "library", "add", "--name", "Choir", "--writable"])
            .unwrap();
        let Command::Library(args) = cli.command else { panic!("wrong command") };
        cmd_library(&libraries, args.action).await.unwrap();
        libraries.dispose().await;

        let reopened = open_libraries(&settings).await.unwrap();
        let configs = reopened.configs().snapshot();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].object.display_name, "Choir");
        assert!(!configs[0].object.readonly);
    }

    #[tokio::test]
    async fn imported_songs_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let file = dir.path().join("songs.json");
        std::fs::write(&file, r#"[{"title":"Abide","music":"[G]Abide with me"}]"#).unwrap();

        let libraries = open_libraries(&settings).await.unwrap();
        let added = libraries
            .add_library(LibraryConfig {
                readonly: false,
                ..LibraryConfig::named("Choir")
            })
            .await
            .unwrap();
        cmd_song(
            &libraries,
            &settings,
            SongAction::Import(ImportArgs {
                library: added.object.id.clone(),
                file,
            }),
        )
        .await
        .unwrap();
        libraries.dispose().await;

        let reopened = open_libraries(&settings).await.unwrap();
        let list = to_partial_list(reopened.songs().list(None)).await.unwrap();
        assert_eq!(list.items().len(), 1);
        assert_eq!(list.items()[0].object.lyrics(), "Abide with me");
    }

    #[tokio::test]
    async fn sync_with_unreachable_remote_fails() {
        let dir = tempfile::tempdir().unwrap();
        let libraries = open_libraries(&settings(dir.path())).await.unwrap();
        libraries
            .add_library(LibraryConfig {
                remote_url: "https://songs.example".into(),
                ..LibraryConfig::named("Shared")
            })
            .await
            .unwrap();
        assert!(cmd_sync(&libraries).await.is_err());
    }

    #[tokio::test]
    async fn unknown_library_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let libraries = open_libraries(&settings(dir.path())).await.unwrap();
        let result = cmd_library(&libraries, LibraryAction::Remove { id: "nope".into() }).await;
        assert!(result.is_err());
    }
}
