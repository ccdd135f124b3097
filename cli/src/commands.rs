use crate::cli::{
    AddServerArgs, AssocCommand, CatArgs, Cli, Commands, DownloadArgs, LsArgs, MkdirArgs,
    PathArgs, RmArgs, ServersCommand, Target, UploadArgs,
};
use crate::env::Env;
use crate::opener;
use crate::store::{SavedServer, Settings, SettingsStore};
use anyhow::{Context, bail};
use log::{debug, info, warn};
use secrecy::SecretString;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use svnc_core::association::{AssociationTable, ContentType, Preview};
use svnc_core::cache::Row;
use svnc_core::command::SvnRunner;
use svnc_core::connection::Connection;
use svnc_core::listing::RepositoryEntry;
use svnc_core::path;
use svnc_core::repository::Repository;
use svnc_core::session::{Activation, Session};
use svnc_core::transfer::{BatchReport, TaskId, TransferCoordinator, TransferEvent, TransferState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub(crate) async fn run(config: Env, cli: Cli) -> anyhow::Result<()> {
    let store = SettingsStore::new("svnc", "svnc")?;
    let mut settings = store.load()?;

    match cli.command {
        Commands::Servers(command) => {
            servers(&config, &store, &mut settings, &cli.target, command).await
        }
        Commands::Assoc(command) => associations(&store, &mut settings, command),
        Commands::Version => Ok(()),
        command => {
            let (connection, server_id) = resolve_connection(&config, &settings, &cli.target)?;
            let mut client = Client::open(&config, connection, settings.associations.clone()).await?;

            if let Some(id) = server_id {
                if settings.last_active.as_deref() != Some(id.as_str()) {
                    settings.last_active = Some(id);
                    store.save(&settings)?;
                }
            }

            let result = client.execute(command).await;
            client.finish().await;
            result
        }
    }
}

async fn servers(
    config: &Env,
    store: &SettingsStore,
    settings: &mut Settings,
    target: &Target,
    command: ServersCommand,
) -> anyhow::Result<()> {
    match command {
        ServersCommand::List => {
            if settings.servers.is_empty() {
                println!("no saved servers");
            }
            for server in &settings.servers {
                let active = if settings.last_active.as_deref() == Some(server.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{active} {}  {}  {}  {}",
                    server.id,
                    server.alias,
                    server.url,
                    server.username.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        ServersCommand::Add(args) => add_server(config, store, settings, target, args).await,
        ServersCommand::Remove { id } => {
            if !settings.remove(&id) {
                bail!("no saved server with id {id}");
            }
            store.save(settings)?;
            println!("removed {id}");
            Ok(())
        }
        ServersCommand::Use { id } => {
            if settings.server(&id).is_none() {
                bail!("no saved server with id {id}");
            }
            settings.last_active = Some(id);
            store.save(settings)
        }
    }
}

/// Saves a server only after its root could be listed with the given credentials.
async fn add_server(
    config: &Env,
    store: &SettingsStore,
    settings: &mut Settings,
    target: &Target,
    args: AddServerArgs,
) -> anyhow::Result<()> {
    let url = path::normalize(&args.url);
    let username = target.username.clone();
    let connection = connection(config, &url, username.clone())?;

    let client = Client::open(config, connection, settings.associations.clone())
        .await
        .with_context(|| format!("could not verify {url}; nothing was saved"))?;
    let entries = client.session.root_entries().len();
    client.finish().await;

    let id = args.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let server = SavedServer {
        id: id.clone(),
        alias: args.alias.unwrap_or_else(|| url.clone()),
        url,
        username,
    };

    let replaced = settings.upsert(server);
    settings.last_active = Some(id.clone());
    store.save(settings)?;

    let verb = if replaced { "updated" } else { "saved" };
    println!("{verb} server {id} ({entries} entries at root)");
    Ok(())
}

fn associations(
    store: &SettingsStore,
    settings: &mut Settings,
    command: AssocCommand,
) -> anyhow::Result<()> {
    match command {
        AssocCommand::List => {
            for (extension, mode) in settings.associations.iter() {
                println!("{extension:<8} {mode}");
            }
            Ok(())
        }
        AssocCommand::Set { extension, mode } => {
            if settings.associations.set(&extension, mode) {
                store.save(settings)?;
            }
            Ok(())
        }
        AssocCommand::Remove { extension } => {
            if settings.associations.remove(&extension) {
                store.save(settings)?;
            }
            Ok(())
        }
    }
}

/// Picks the one-off URL, the requested saved server, or the last used one.
fn resolve_connection(
    config: &Env,
    settings: &Settings,
    target: &Target,
) -> anyhow::Result<(Connection, Option<String>)> {
    if let Some(url) = &target.url {
        return Ok((connection(config, url, target.username.clone())?, None));
    }

    let Some(id) = target.server.as_ref().or(settings.last_active.as_ref()) else {
        bail!("no server selected; save one with `svnc servers add <url>` or pass --url");
    };
    let server = settings
        .server(id)
        .with_context(|| format!("no saved server with id {id}"))?;

    let username = target.username.clone().or_else(|| server.username.clone());
    Ok((connection(config, &server.url, username)?, Some(server.id.clone())))
}

fn connection(config: &Env, url: &str, username: Option<String>) -> anyhow::Result<Connection> {
    let mut connection = Connection::new(url);
    if let Some(username) = username {
        let password = match &config.password {
            Some(password) => password.clone(),
            None => rpassword::prompt_password(format!("Password for {username}: "))?,
        };
        connection = connection.with_credentials(username, SecretString::from(password));
    }
    Ok(connection)
}

/// Full URL for `target`: absolute URLs pass through, anything else is taken relative to `base`.
fn resolve(base: &str, target: &str) -> String {
    if target.contains("://") {
        return path::normalize(target);
    }
    let relative = target.trim_matches('/');
    if relative.is_empty() || relative == "." {
        return base.to_string();
    }
    path::join(base, relative)
}

struct Client {
    session: Session,
    progress: JoinHandle<()>,
}

impl Client {
    async fn open(
        config: &Env,
        connection: Connection,
        associations: AssociationTable,
    ) -> anyhow::Result<Self> {
        let runner = Arc::new(SvnRunner::new(config.runner_config()));
        let repo = Arc::new(
            Repository::new(runner, connection).with_preview_limit(config.preview_limit()),
        );

        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let transfers = TransferCoordinator::new(repo, config.scratch_dir()?).with_events(tx);
        let progress = tokio::spawn(render_progress(rx));

        let session = Session::open(transfers, associations).await?;
        Ok(Self { session, progress })
    }

    /// Drops the session, closing the event channel, and waits for the last lines.
    async fn finish(self) {
        drop(self.session);
        if let Err(err) = self.progress.await {
            warn!("progress renderer stopped: {err}");
        }
    }

    async fn execute(&mut self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Ls(args) => self.list(args).await,
            Commands::Download(args) => self.download(args).await,
            Commands::Upload(args) => self.upload(args).await,
            Commands::Rm(args) => self.remove(args).await,
            Commands::Mkdir(args) => self.mkdir(args).await,
            Commands::Log(args) => self.history(args).await,
            Commands::Cat(args) => self.cat(args).await,
            Commands::Open(args) => self.open_path(args).await,
            Commands::Servers(_) | Commands::Assoc(_) | Commands::Version => Ok(()),
        }
    }

    fn root_url(&self) -> String {
        self.session.connection().repository_url.clone()
    }

    /// Finds the listing entry for `url`, loading its parent directory when needed.
    async fn locate(&mut self, url: &str) -> anyhow::Result<RepositoryEntry> {
        let url = path::normalize(url);
        if let Some(entry) = self.session.cache().find_entry(&url) {
            return Ok(entry);
        }

        let parent = path::parent(&url).with_context(|| format!("{url} has no parent"))?;
        self.session.navigate(&parent).await?;
        self.session
            .cache()
            .find_entry(&url)
            .with_context(|| format!("{url} not found"))
    }

    async fn list(&mut self, args: LsArgs) -> anyhow::Result<()> {
        if let Some(dir) = &args.path {
            let url = resolve(&self.root_url(), dir);
            self.session.navigate(&url).await?;
        }
        for dir in &args.expand {
            let url = resolve(self.session.root(), dir);
            self.session.toggle_expand(&url).await?;
        }

        println!("{}", self.session.root());
        for row in self.session.visible_rows() {
            println!("{}", format_row(&row));
        }
        Ok(())
    }

    async fn download(&mut self, args: DownloadArgs) -> anyhow::Result<()> {
        let root = self.root_url();
        let mut entries = Vec::with_capacity(args.paths.len());
        for target in &args.paths {
            entries.push(self.locate(&resolve(&root, target)).await?);
        }

        // locating may navigate, which clears the selection
        self.session.clear_selection();
        for entry in entries {
            self.session.add_to_selection(entry);
        }

        tokio::fs::create_dir_all(&args.dest).await?;
        let report = self.session.download_selected(&args.dest).await;
        summarize("downloaded", &report)
    }

    async fn upload(&mut self, args: UploadArgs) -> anyhow::Result<()> {
        if let Some(dir) = &args.dir {
            let url = resolve(&self.root_url(), dir);
            self.session.navigate(&url).await?;
        }
        let report = self.session.upload_files(&args.files).await;
        summarize("uploaded", &report)
    }

    async fn remove(&mut self, args: RmArgs) -> anyhow::Result<()> {
        let url = resolve(&self.root_url(), &args.path);
        let entry = self.locate(&url).await?;
        self.session.delete(&entry, args.message.as_deref()).await?;
        println!("deleted {}", entry.full_path);
        Ok(())
    }

    async fn mkdir(&mut self, args: MkdirArgs) -> anyhow::Result<()> {
        let url = resolve(&self.root_url(), &args.path);
        let (Some(parent), Some(name)) = (path::parent(&url), path::file_name(&url)) else {
            bail!("{url} is not a valid directory path");
        };
        let name = name.to_string();

        if path::normalize(&parent) != self.session.root() {
            self.session.navigate(&parent).await?;
        }
        self.session
            .create_folder(&name, args.message.as_deref())
            .await?;
        println!("created {url}");
        Ok(())
    }

    async fn history(&mut self, args: PathArgs) -> anyhow::Result<()> {
        let url = resolve(&self.root_url(), &args.path);
        let entry = self.locate(&url).await?;
        for change in self.session.history(&entry).await? {
            let date = change
                .date
                .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            let summary = change.message.lines().next().unwrap_or_default();
            println!("r{:<6} {:<12} {:<16} {}", change.revision, change.author, date, summary);
        }
        Ok(())
    }

    async fn cat(&mut self, args: CatArgs) -> anyhow::Result<()> {
        let url = resolve(&self.root_url(), &args.path);
        let entry = self.locate(&url).await?;
        if entry.is_dir() {
            bail!("{url} is a directory");
        }
        let preview = self.session.preview(&entry, args.revision).await?;
        write_preview(&preview)
    }

    async fn open_path(&mut self, args: PathArgs) -> anyhow::Result<()> {
        let url = resolve(&self.root_url(), &args.path);
        let entry = self.locate(&url).await?;

        match self.session.activate(&entry).await? {
            Activation::Navigated(_) => {
                for row in self.session.visible_rows() {
                    println!("{}", format_row(&row));
                }
                Ok(())
            }
            Activation::Preview(preview) => write_preview(&preview),
            Activation::External(local) => {
                info!("opening {}", local.display());
                opener::open(&local).await
            }
        }
    }
}

fn write_preview(preview: &Preview) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    match preview.content_type {
        ContentType::Text => stdout.write_all(preview.payload.as_bytes())?,
        ContentType::Binary => stdout.write_all(&preview.bytes()?)?,
    }
    stdout.flush()?;
    Ok(())
}

fn format_row(row: &Row) -> String {
    let entry = &row.entry;
    let indent = "  ".repeat(row.depth);
    let marker = match (entry.is_dir(), row.expanded) {
        (true, true) => "v ",
        (true, false) => "> ",
        (false, _) => "  ",
    };
    let name = if entry.is_dir() {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    };
    let size = if entry.is_dir() {
        String::new()
    } else {
        entry.size_bytes.to_string()
    };
    let revision = entry
        .last_commit_revision
        .map(|rev| format!("r{rev}"))
        .unwrap_or_default();
    let modified = entry
        .last_modified_at
        .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();

    format!(
        "{indent}{marker}{name:<32} {size:>10} {revision:>7} {:<12} {modified}",
        entry.last_author
    )
}

fn summarize(verb: &str, report: &BatchReport) -> anyhow::Result<()> {
    println!("{verb} {}/{}", report.succeeded, report.total());
    for failure in &report.failures {
        eprintln!("  {}: {}", failure.target, failure.error);
    }
    if !report.failures.is_empty() {
        bail!("{} of {} transfers failed", report.failures.len(), report.total());
    }
    Ok(())
}

/// Prints transfer progress on stderr in 10% steps, plus one line per finished task.
async fn render_progress(mut events: mpsc::Receiver<TransferEvent>) {
    let mut shown: HashMap<TaskId, (String, Option<u8>)> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            TransferEvent::Queued(task) => {
                debug!("queued {:?} {}", task.kind, task.id);
                let label = path::file_name(&task.source)
                    .or_else(|| path::file_name(&task.target))
                    .unwrap_or(&task.target)
                    .to_string();
                shown.insert(task.id, (label, None));
            }
            TransferEvent::Progress { id, percent, .. } => {
                let (Some(percent), Some((label, last))) = (percent, shown.get_mut(&id)) else {
                    continue;
                };
                let due = match *last {
                    None => true,
                    Some(last) => percent == 100 || percent >= last.saturating_add(10),
                };
                if due && *last != Some(percent) {
                    eprintln!("{percent:>3}% {label}");
                    *last = Some(percent);
                }
            }
            TransferEvent::Finished(task) => {
                let label = shown
                    .remove(&task.id)
                    .map(|(label, _)| label)
                    .unwrap_or_else(|| task.target.clone());
                match task.state {
                    TransferState::Failed { reason, .. } => eprintln!("failed {label}: {reason}"),
                    _ => eprintln!("done   {label}"),
                }
            }
        }
    }
}
