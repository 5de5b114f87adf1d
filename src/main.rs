//! bookshelf-rs entry point.

use bookshelf_rs::{
    client::CatalogClient,
    config::{BookCommand, Cli, Command, Config, TagCommand},
    db::Database,
    reader::{PositionStore, load_session},
    server,
};
use clap::Parser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Find or load config
    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let mut config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    if let Some(url) = cli.api_url.clone() {
        config.client.base_url = url;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookshelf_rs=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force),
        Some(Command::Books { action }) => cmd_books(action, &config).await,
        Some(Command::Tags { action }) => cmd_tags(action, &config).await,
        Some(Command::Read { book_id, page }) => cmd_read(&book_id, page, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => cmd_serve(config, None).await,
    }
}

/// Initialize config and database.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    println!("\nEdit config.toml, then run: bookshelf-rs serve");
    println!("Import books with: bookshelf-rs books import <file.epub>");

    Ok(())
}

/// Book catalog commands.
async fn cmd_books(action: BookCommand, config: &Config) -> anyhow::Result<()> {
    let client = CatalogClient::new(config.client.clone())?;

    match action {
        BookCommand::List { tags } => {
            let books = if tags.is_empty() {
                client.list_books().await?
            } else {
                client.filter_books(&tags).await?
            };

            if books.is_empty() {
                println!("No books found.");
            } else {
                println!("{:<36} {:<6} {:<17} TITLE", "ID", "PAGE", "ADDED");
                println!("{}", "-".repeat(80));
                for book in books {
                    let tags: Vec<&str> = book.tags.iter().map(|t| t.name.as_str()).collect();
                    println!(
                        "{:<36} {:<6} {:<17} {}{}",
                        book.id,
                        book.last_read_page,
                        book.created_at.format("%Y-%m-%d %H:%M"),
                        book.title,
                        if tags.is_empty() {
                            String::new()
                        } else {
                            format!(" [{}]", tags.join(", "))
                        }
                    );
                }
            }
        }

        BookCommand::Import { path, cover } => {
            let epub = std::fs::read(&path)?;
            let cover = cover.map(std::fs::read).transpose()?;
            let file_name = file_name(&path)?;

            let book = client.upload_book(&file_name, epub, cover).await?;
            println!("Imported: {} (id: {})", book.title, book.id);
        }

        BookCommand::Cover { book_id, output } => match client.get_cover(&book_id).await? {
            Some(data) => {
                std::fs::write(&output, data)?;
                println!("Saved cover: {}", output.display());
            }
            None => println!("Book has no cover: {}", book_id),
        },
    }

    Ok(())
}

/// Tag commands.
async fn cmd_tags(action: TagCommand, config: &Config) -> anyhow::Result<()> {
    let client = CatalogClient::new(config.client.clone())?;

    match action {
        TagCommand::List => {
            let tags = client.list_tags().await?;
            if tags.is_empty() {
                println!("No tags found.");
            } else {
                println!("{:<36} {:<6} NAME", "ID", "BOOKS");
                println!("{}", "-".repeat(60));
                for tag in tags {
                    println!("{:<36} {:<6} {}", tag.id, tag.book_count, tag.name);
                }
            }
        }

        TagCommand::Add { name } => {
            let tag = client.create_tag(&name).await?;
            println!("Created tag: {} (id: {})", tag.name, tag.id);
        }

        TagCommand::Assign { book_id, tag_ids } => {
            let book = client.set_book_tags(&book_id, &tag_ids).await?;
            let names: Vec<&str> = book.tags.iter().map(|t| t.name.as_str()).collect();
            println!("{}: {}", book.title, names.join(", "));
        }
    }

    Ok(())
}

/// Read a book in the terminal.
async fn cmd_read(book_id: &str, page: Option<usize>, config: &Config) -> anyhow::Result<()> {
    let client = Arc::new(CatalogClient::new(config.client.clone())?);
    let store = PositionStore::open(&config.reader.positions_path)?;

    let mut session = load_session(&client, store, book_id, config.reader.title_strategy).await?;
    if let Some(page) = page {
        session.go_to_page(page.saturating_sub(1));
        session.sync_last_page(client.clone()).await?;
    }

    for error in session.page_errors() {
        eprintln!("warning: skipped {}: {}", error.source, error.message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let view = session.view();
        println!("\n=== {} ({}/{}) ===\n", view.title, view.page_index + 1, view.page_count);
        println!("{}", view.text);
        print!("\n[n]ext, [p]revious, page number, [q]uit > ");
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let before = session.page_index();
        match line.trim() {
            "q" | "quit" => break,
            "n" | "" => {
                session.next_page();
            }
            "p" => {
                session.previous_page();
            }
            other => match other.parse::<usize>() {
                Ok(n) => {
                    session.go_to_page(n.saturating_sub(1));
                }
                Err(_) => println!("Unknown command: {}", other),
            },
        }

        // Updates land in order
        if session.page_index() != before {
            session.sync_last_page(client.clone()).await?;
        }
    }

    Ok(())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    // Override bind address if specified
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    let db = Database::open(&config.database.path)?;

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        books = db.book_count()?,
        "Starting bookshelf-rs server"
    );

    let state = server::AppState::new(config.clone(), db);
    let app = server::create_router(state);

    let listener = TcpListener::bind(config.server.bind).await?;
    tracing::info!(address = %config.server.bind, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", path.display()))
}
