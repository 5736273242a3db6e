//! Satchel - command-line front end for the attachment store

use std::cell::Cell;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use attachments::{
    Attachment, AttachmentId, ContentStore, DeferredQueue, MailId, ReplyListener, StoreConfig,
};
use clap::{Parser, Subcommand};
use log::{error, info};

#[derive(Parser)]
#[command(name = "satchel", version, about = "Content-addressed attachment store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Store configuration file (defaults to ~/.config/satchel/store.json)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file, overriding the configuration
    #[arg(long, global = true, env = "SATCHEL_DB", value_name = "FILE")]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import files as attachments of a message
    Import {
        mail_id: i64,
        files: Vec<PathBuf>,
        /// MIME type for every file instead of guessing by suffix
        #[arg(short, long)]
        mime_type: Option<String>,
    },
    /// List the attachments of a message
    List {
        mail_id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Export an attachment's content
    Export {
        attachment_id: i64,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write an attachment to the attachments directory and print the
    /// viewer command for it
    View { attachment_id: i64 },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run(Cli::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut cfg = StoreConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        cfg.database_path = db;
    }
    let store = cfg.open_store()?;

    match cli.command {
        Commands::Import {
            mail_id,
            files,
            mime_type,
        } => import(&store, MailId(mail_id), &files, mime_type.as_deref()),
        Commands::List { mail_id, json } => list(&store, MailId(mail_id), json),
        Commands::Export {
            attachment_id,
            output,
        } => {
            let attachment = load(&store, attachment_id)?;
            match output {
                Some(path) => {
                    let file = File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let written = export(&store, &attachment, file)?;
                    info!("Wrote {} bytes to {}", written, path.display());
                    Ok(())
                }
                None => export(&store, &attachment, io::stdout().lock()).map(|_| ()),
            }
        }
        Commands::View { attachment_id } => view(&store, &cfg, attachment_id),
    }
}

fn load(store: &ContentStore, attachment_id: i64) -> Result<Attachment> {
    store
        .attachment(AttachmentId(attachment_id))?
        .with_context(|| format!("No attachment {}", attachment_id))
}

fn import(store: &ContentStore, mail_id: MailId, files: &[PathBuf], mime_type: Option<&str>) -> Result<()> {
    if files.is_empty() {
        bail!("No files given");
    }
    let mime_types = store.mime_types()?;

    for path in files {
        let mime = match mime_type {
            Some(m) => m.to_string(),
            None => guess_for(path, &mime_types).to_string(),
        };
        let mut attachment = Attachment::from_file(path, mime);
        let id = attachment
            .store(store, mail_id)
            .with_context(|| format!("Failed to import {}", path.display()))?;
        println!("{}\t{}\t{}", id, attachment.size(), path.display());
    }
    Ok(())
}

fn guess_for<'a>(path: &Path, mime_types: &'a attachments::MimeTypes) -> &'a str {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    mime_types.guess(name)
}

fn list(store: &ContentStore, mail_id: MailId, json: bool) -> Result<()> {
    let list = store.list_for_mail(mail_id)?;

    if json {
        let rows: Vec<serde_json::Value> = list
            .iter()
            .map(|a| {
                serde_json::json!({
                    "id": a.id(),
                    "filename": a.filename(),
                    "mime_type": a.mime_type(),
                    "size": a.size(),
                    "content_id": a.mime_content_id(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for a in &list {
        let id = a.id().map(|id| id.to_string()).unwrap_or_default();
        println!(
            "{}\t{}\t{}\t{}",
            id,
            a.size(),
            a.mime_type(),
            a.filename().unwrap_or("-")
        );
    }
    Ok(())
}

/// Signals from the reply, polled by [`export`]
#[derive(Default)]
struct ExportSignals {
    ready: Cell<bool>,
    finished: Cell<bool>,
}

impl ReplyListener for ExportSignals {
    fn ready_read(&self) {
        self.ready.set(true);
    }

    fn finished(&self) {
        self.finished.set(true);
    }
}

/// Pull the attachment through a reply until it finishes
///
/// An empty attachment has nothing to deliver and exports zero bytes.
fn export(store: &ContentStore, attachment: &Attachment, mut out: impl Write) -> Result<u64> {
    if attachment.size() == 0 {
        out.flush()?;
        return Ok(0);
    }

    let queue = DeferredQueue::new();
    let signals = Rc::new(ExportSignals::default());
    let mut reply = attachment.network_reply(store, &queue, signals.clone());

    let mut buf = vec![0u8; store.chunk_size()];
    let mut written = 0u64;
    while !signals.finished.get() {
        queue.run_pending();
        if signals.ready.replace(false) {
            let pulled = reply.read_data(&mut buf);
            out.write_all(&buf[..pulled.bytes])?;
            written += pulled.bytes as u64;
        } else if queue.is_empty() && !signals.finished.get() {
            break;
        }
    }
    out.flush()?;

    if let Some(e) = reply.error() {
        bail!("Attachment {}: {}", attachment.id().map(|id| id.as_i64()).unwrap_or_default(), e);
    }
    reply.close();
    Ok(written)
}

fn view(store: &ContentStore, cfg: &StoreConfig, attachment_id: i64) -> Result<()> {
    let attachment = load(store, attachment_id)?;
    let mime_types = store.mime_types()?;
    let path = attachment.temp_location(cfg.attachments_directory.as_deref(), &mime_types)?;

    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    store.stream_to(&attachment, file)?;

    let document = path.to_string_lossy();
    match store.viewer_for(attachment.mime_type(), cfg.conf_name.as_deref())? {
        Some(program) => println!("{}", attachments::viewer_command(&program, &document)),
        None => println!("{}", document),
    }
    Ok(())
}
