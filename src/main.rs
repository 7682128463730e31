use anyhow::{bail, Context, Result};
use chordkit::config::{self, Config};
use chordkit::engine::batch::add_batch;
use chordkit::engine::catalog::{Catalog, SearchScope};
use chordkit::engine::groups::{group_status, DisabledGroups};
use chordkit::engine::keys::{split_key_spec, KeySet};
use chordkit::engine::store::YamlStore;
use chordkit::engine::suggest::suggestions;
use chordkit::engine::{Chord, OutputType};
use chordkit::error::{CatalogError, SessionError};
use chordkit::impulse::Session;
use chordkit::logging;
use chordkit::machine::TerminalKeys;
use chordkit::pending::{sync_pending, PendingQueue};
use chordkit::ui::{Interaction, TerminalUi};
use clap::{Parser, Subcommand, ValueEnum};
use crossterm::style::Stylize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "chordkit",
    version,
    about = "Record keyboard chords and compile them into Karabiner rules"
)]
struct Cli {
    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Add a chord, prompting for anything left out
    Add {
        /// Keys pressed together, e.g. "asd" or "a+s+d"
        keys: Option<String>,
        output: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        #[arg(long = "type", value_enum, default_value_t = OutputKind::Text)]
        output_type: OutputKind,
        /// Add every `keys,output` line of a file
        #[arg(short, long)]
        batch: Option<PathBuf>,
        #[arg(long)]
        no_confirm: bool,
    },
    /// Remove a chord by its keys or by its output
    Remove {
        keys: Option<String>,
        #[arg(long)]
        output: Option<String>,
    },
    /// List chords
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long, value_enum, default_value_t = SortBy::Created)]
        sort: SortBy,
    },
    /// Search keys and output text
    Search {
        term: String,
        #[arg(long, conflicts_with = "output")]
        input: bool,
        #[arg(long)]
        output: bool,
    },
    /// Chords that share keys with the given ones
    Similar { keys: String },
    /// Catalog statistics
    Stats {
        #[arg(short, long)]
        detailed: bool,
    },
    /// Show or switch rule groups
    Groups {
        #[arg(long)]
        enable: Option<String>,
        #[arg(long)]
        disable: Option<String>,
        #[arg(long)]
        toggle: Option<String>,
    },
    /// Recompile every chord into the Karabiner config
    Refresh,
    /// Write rules to the Karabiner config, or one file per group
    Export {
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        modular: bool,
    },
    /// Select the chordkit profile in Karabiner
    Activate,
    /// Record chords by pressing them
    Impulse {
        #[arg(long)]
        skip_permission_check: bool,
    },
    /// Queue a chord for the next sync without loading the catalog
    Queue { keys: String, output: String },
    /// Import queued chords and recompile
    Sync,
    /// Common chords not bound yet
    Suggest,
    /// Remove the most recently added chords
    Undo {
        #[arg(default_value_t = 1)]
        count: usize,
    },
    /// Show or change settings
    Config {
        #[arg(long)]
        show: bool,
        /// Chord detection timeout in milliseconds
        #[arg(long)]
        chord_timeout: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputKind {
    Text,
    Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortBy {
    Input,
    Output,
    Usage,
    Created,
}

struct App {
    config: Config,
    config_path: PathBuf,
    ui: TerminalUi,
}

impl App {
    fn catalog(&self) -> Result<Catalog> {
        let path = self.config.chord_file();
        let catalog = Catalog::open(YamlStore::new(&path))
            .with_context(|| format!("could not load chords from {}", path.display()))?;
        Ok(catalog.with_policy(self.config.catalog.conflict_policy))
    }

    /// Recompile after a change. The change itself already happened, so failure only warns.
    fn publish(&self, catalog: &Catalog) {
        let result = self
            .config
            .rule_sync()
            .map_err(anyhow::Error::from)
            .and_then(|sync| Ok(sync.sync(catalog)?));
        match result {
            Ok(report) => self.ui.success(&format!(
                "Karabiner updated ({} rules, {} kept from elsewhere)",
                report.rules_written, report.rules_preserved
            )),
            Err(e) => self.ui.warning(&format!("Karabiner was not updated: {e:#}")),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(config::logs_dir().as_deref());

    let (config, config_path) = match cli.config {
        Some(path) => (Config::load_or_create(&path)?, path),
        None => Config::load_default()?,
    };
    let mut app = App {
        config,
        config_path,
        ui: TerminalUi::new(),
    };

    match cli.command {
        Command::Add {
            keys,
            output,
            category,
            tags,
            output_type,
            batch,
            no_confirm,
        } => match batch {
            Some(file) => add_from_file(&app, &file, category.as_deref()),
            None => {
                let tags: Vec<String> = tags
                    .map(|t| {
                        t.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();
                let output_type = match output_type {
                    OutputKind::Text => OutputType::Text,
                    OutputKind::Command => OutputType::Command,
                };
                add(&mut app, keys, output, output_type, category.as_deref(), &tags, no_confirm)
            }
        },
        Command::Remove { keys, output } => remove(&app, keys, output),
        Command::List { category, sort } => list(&app, category.as_deref(), sort),
        Command::Search {
            term,
            input,
            output,
        } => {
            let scope = match (input, output) {
                (true, _) => SearchScope::Input,
                (_, true) => SearchScope::Output,
                _ => SearchScope::All,
            };
            let catalog = app.catalog()?;
            let found = catalog.search(&term, scope);
            if found.is_empty() {
                println!("No chords match '{term}'.");
            }
            for chord in found {
                print_chord(chord);
            }
            Ok(())
        }
        Command::Similar { keys } => {
            let keys = KeySet::parse(&keys)?;
            let catalog = app.catalog()?;
            for s in catalog.similar(&keys) {
                println!(
                    "{:>4.0}%  {} → {}  (shared: {})",
                    s.similarity * 100.0,
                    s.chord.input_keys.to_string().cyan(),
                    s.chord.output_text,
                    s.shared
                );
            }
            Ok(())
        }
        Command::Stats { detailed } => stats(&app, detailed),
        Command::Groups {
            enable,
            disable,
            toggle,
        } => groups(&app, enable, disable, toggle),
        Command::Refresh => {
            let catalog = app.catalog()?;
            app.publish(&catalog);
            Ok(())
        }
        Command::Export {
            output_dir,
            modular,
        } => export(&app, output_dir, modular),
        Command::Activate => {
            app.config
                .engine_config()
                .activate()
                .context("could not activate profile")?;
            app.ui
                .success(&format!("Profile '{}' is now active", app.config.engine.profile_name));
            Ok(())
        }
        Command::Impulse {
            skip_permission_check,
        } => impulse(app, skip_permission_check),
        Command::Queue { keys, output } => {
            let queue = PendingQueue::new(app.config.pending_file());
            let entry = queue.push(KeySet::parse(&keys)?, &output)?;
            app.ui.success(&format!(
                "Queued {} → {} (run 'chordkit sync' to apply)",
                entry.input_keys, entry.output_text
            ));
            Ok(())
        }
        Command::Sync => {
            let queue = PendingQueue::new(app.config.pending_file());
            let mut catalog = app.catalog()?;
            let report = sync_pending(&queue, &mut catalog)?;
            for (keys, e) in &report.failed {
                app.ui.failure(&format!("{keys}: {e}"));
            }
            if report.imported.is_empty() {
                println!("No queued chords to sync.");
                return Ok(());
            }
            app.ui.success(&format!(
                "Imported {} queued chords ({} already bound)",
                report.imported.len(),
                report.skipped_conflicts
            ));
            app.publish(&catalog);
            Ok(())
        }
        Command::Suggest => {
            let catalog = app.catalog()?;
            let list = suggestions(&catalog, 10);
            let Some(first) = list.first() else {
                println!("Every suggested chord is already bound.");
                return Ok(());
            };
            app.ui.heading("Suggested chords");
            for (i, s) in list.iter().enumerate() {
                println!("  {:>2}. {} → '{}'", i + 1, s.keys.to_string().cyan(), s.output_text);
            }
            println!(
                "\nUse 'chordkit add \"{}\" \"{}\"' to add one.",
                first.keys, first.output_text
            );
            Ok(())
        }
        Command::Undo { count } => undo(&app, count),
        Command::Config {
            show,
            chord_timeout,
        } => configure(&mut app, show, chord_timeout),
    }
}

fn print_chord(chord: &Chord) {
    let category = chord
        .category
        .as_deref()
        .map(|c| format!(" [{c}]"))
        .unwrap_or_default();
    let kind = match chord.output_type {
        OutputType::Command => " (command)",
        _ => "",
    };
    println!(
        "  {:<20} → {}{}{}  {}",
        chord.input_keys.to_string().cyan(),
        chord.output_text,
        kind,
        category.dark_grey(),
        format!("used {}×", chord.usage_count).dark_grey()
    );
}

fn prompt(ui: &mut TerminalUi, label: &str) -> Result<String> {
    match ui.read_line(label)? {
        Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
        _ => bail!("cancelled"),
    }
}

fn add(
    app: &mut App,
    keys: Option<String>,
    output: Option<String>,
    output_type: OutputType,
    category: Option<&str>,
    tags: &[String],
    no_confirm: bool,
) -> Result<()> {
    let keys = match keys {
        Some(keys) => keys,
        None => prompt(&mut app.ui, "Keys (e.g. a+s+d): ")?,
    };
    let tokens = split_key_spec(&keys);
    let key_set = KeySet::from_raw(&tokens)?;
    let output = match output {
        Some(output) => output,
        None => prompt(&mut app.ui, "Output text: ")?,
    };
    let mut catalog = app.catalog()?;

    if !no_confirm {
        let threshold = app.config.sensitivity.threshold_ms(&key_set);
        let question = format!(
            "Add {} → '{}' ({}, {}ms)?",
            key_set,
            output,
            app.config.sensitivity.label(&key_set),
            threshold
        );
        if !app.ui.confirm(&question)? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let chord = match catalog.add_with_type(&tokens, &output, output_type, category, tags) {
        Ok(chord) => chord,
        Err(CatalogError::Conflict(existing)) => {
            app.ui.warning(&format!(
                "{} is already bound to '{}'",
                existing.input_keys, existing.output_text
            ));
            if no_confirm || !app.ui.confirm("Replace it?")? {
                bail!("chord {} already exists", existing.input_keys);
            }
            catalog.remove(&existing.id)?;
            catalog.add_with_type(&tokens, &output, output_type, category, tags)?
        }
        Err(e) => return Err(e.into()),
    };
    app.ui
        .success(&format!("Added {} → {}", chord.input_keys, chord.output_text));

    let similar: Vec<_> = catalog
        .similar(&chord.input_keys)
        .into_iter()
        .filter(|s| s.chord.id != chord.id)
        .collect();
    if !similar.is_empty() {
        app.ui.warning("Shares keys with:");
        for s in similar.iter().take(3) {
            println!("    {} → {}", s.chord.input_keys, s.chord.output_text);
        }
    }
    app.publish(&catalog);
    Ok(())
}

fn add_from_file(app: &App, file: &Path, category: Option<&str>) -> Result<()> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("could not read {}", file.display()))?;
    let mut catalog = app.catalog()?;
    let report = add_batch(&mut catalog, &content, category);

    for line in &report.malformed {
        app.ui.warning(&format!("line {line}: expected 'keys,output'"));
    }
    for (line, e) in &report.failed {
        app.ui
            .failure(&format!("line {}: {} → {}: {e}", line.line, line.keys, line.output_text));
    }
    app.ui.success(&format!("Added {} chords", report.added.len()));
    if !report.added.is_empty() {
        app.publish(&catalog);
    }
    Ok(())
}

fn remove(app: &App, keys: Option<String>, output: Option<String>) -> Result<()> {
    let mut catalog = app.catalog()?;
    let removed = match (keys, output) {
        (Some(keys), _) => catalog.remove_by_input(&split_key_spec(&keys))?,
        (None, Some(output)) => catalog.remove_by_output(&output)?,
        (None, None) => bail!("give the chord's keys or --output"),
    };
    match removed {
        Some(chord) => {
            app.ui
                .success(&format!("Removed {} → {}", chord.input_keys, chord.output_text));
            app.publish(&catalog);
        }
        None => app.ui.failure("No such chord."),
    }
    Ok(())
}

fn list(app: &App, category: Option<&str>, sort: SortBy) -> Result<()> {
    let catalog = app.catalog()?;
    let mut chords: Vec<&Chord> = catalog
        .list_all()
        .into_iter()
        .filter(|c| category.map_or(true, |cat| c.category.as_deref() == Some(cat)))
        .collect();
    match sort {
        SortBy::Input => chords.sort_by_cached_key(|c| c.input_keys.to_string()),
        SortBy::Output => chords.sort_by_cached_key(|c| c.output_text.to_lowercase()),
        SortBy::Usage => chords.sort_by(|a, b| b.usage_count.cmp(&a.usage_count)),
        SortBy::Created => {}
    }
    if chords.is_empty() {
        println!("No chords yet. Try 'chordkit add' or 'chordkit suggest'.");
        return Ok(());
    }
    app.ui.heading(&format!("{} chords", chords.len()));
    for chord in chords {
        print_chord(chord);
    }
    Ok(())
}

fn stats(app: &App, detailed: bool) -> Result<()> {
    let catalog = app.catalog()?;
    let stats = catalog.statistics(5);
    app.ui.heading("Chord statistics");
    println!("  Total chords:   {}", stats.total);
    println!("  Total usage:    {}", stats.total_usage);
    println!("  Categories:     {}", stats.distinct_categories);
    if !stats.most_used.is_empty() {
        println!("\n  Most used:");
        for chord in &stats.most_used {
            println!(
                "    {} → {} ({}×)",
                chord.input_keys, chord.output_text, chord.usage_count
            );
        }
    }
    if detailed {
        println!("\n  By length:");
        for (len, count) in &stats.by_length {
            println!(
                "    {len} keys: {count} ({}ms)",
                app.config.sensitivity.for_length(*len)
            );
        }
        println!("\n  By category:");
        for (category, count) in &stats.by_category {
            println!("    {category}: {count}");
        }
        if let (Some(oldest), Some(newest)) = (&stats.oldest, &stats.newest) {
            println!(
                "\n  Oldest: {} → {} ({})",
                oldest.input_keys,
                oldest.output_text,
                oldest.created_at.format("%Y-%m-%d")
            );
            println!(
                "  Newest: {} → {} ({})",
                newest.input_keys,
                newest.output_text,
                newest.created_at.format("%Y-%m-%d")
            );
        }
    }
    Ok(())
}

fn groups(
    app: &App,
    enable: Option<String>,
    disable: Option<String>,
    toggle: Option<String>,
) -> Result<()> {
    let mut disabled = DisabledGroups::load(app.config.disabled_groups_file())?;
    let change = match (enable, disable, toggle) {
        (Some(g), _, _) => Some((disabled.set_enabled(&g, true)?, g)),
        (_, Some(g), _) => Some((disabled.set_enabled(&g, false)?, g)),
        (_, _, Some(g)) => Some((disabled.toggle(&g)?, g)),
        _ => None,
    };
    let catalog = app.catalog()?;

    if let Some((enabled, group)) = change {
        let state = if enabled { "enabled" } else { "disabled" };
        app.ui.success(&format!("Group '{group}' {state}"));
        app.publish(&catalog);
        return Ok(());
    }

    app.ui.heading("Chord groups");
    for status in group_status(catalog.iter(), &disabled) {
        let mark = if status.enabled { "on ".green() } else { "off".red() };
        println!("  [{mark}] {} ({} chords)", status.name, status.chord_count);
    }
    Ok(())
}

fn export(app: &App, output_dir: Option<PathBuf>, modular: bool) -> Result<()> {
    let catalog = app.catalog()?;
    if catalog.is_empty() {
        println!("No chords to export.");
        return Ok(());
    }
    if !modular {
        app.publish(&catalog);
        return Ok(());
    }
    let dir = match output_dir {
        Some(dir) => dir,
        None => config::project_dirs()
            .map(|d| d.data_dir().join("rules"))
            .context("no directory to export into, pass --output-dir")?,
    };
    let files = app.config.compiler().export_rule_files(catalog.iter(), &dir)?;
    app.ui.success(&format!(
        "Exported {} chords to {} files in {}",
        catalog.len(),
        files.len(),
        dir.display()
    ));
    for file in &files {
        if let Some(name) = file.file_name() {
            println!("    {}", name.to_string_lossy());
        }
    }
    println!(
        "\nCopy them to ~/.config/karabiner/assets/complex_modifications/ \
         and add them in Karabiner-Elements."
    );
    Ok(())
}

fn impulse(app: App, skip_permission_check: bool) -> Result<()> {
    let mut catalog = app.catalog()?;
    let rules = app.config.rule_sync()?;
    let options = app.config.session_options()?;
    let ui = if skip_permission_check {
        TerminalUi::new().assume_permission()
    } else {
        TerminalUi::new()
    };

    let result = Session::new(&mut catalog, TerminalKeys::new(), ui, options)
        .with_rules(&rules)
        .run();
    match result {
        Ok(summary) => {
            app.ui.success(&format!(
                "Session ended: {} added, {} already bound, {} skipped",
                summary.added.len(),
                summary.already_bound,
                summary.discarded
            ));
            Ok(())
        }
        Err(SessionError::PermissionDenied) => {
            app.ui.failure(
                "Impulse mode reads keys from the terminal; run it from an interactive terminal.",
            );
            bail!(SessionError::PermissionDenied)
        }
        Err(e) => Err(e.into()),
    }
}

fn undo(app: &App, count: usize) -> Result<()> {
    let mut catalog = app.catalog()?;
    let latest: Vec<_> = catalog
        .list_all()
        .iter()
        .rev()
        .take(count)
        .map(|c| c.id)
        .collect();
    if latest.is_empty() {
        app.ui.failure("No chords to undo.");
        return Ok(());
    }
    for id in latest {
        if let Some(chord) = catalog.remove(&id)? {
            app.ui
                .success(&format!("Removed {} → {}", chord.input_keys, chord.output_text));
        }
    }
    app.publish(&catalog);
    Ok(())
}

fn configure(app: &mut App, show: bool, chord_timeout: Option<u64>) -> Result<()> {
    if let Some(ms) = chord_timeout {
        let mut updated = app.config.clone();
        if let Some(warning) = updated.set_chord_timeout(ms)? {
            app.ui.warning(warning);
            if !app.ui.confirm(&format!("Set chord timeout to {ms}ms?"))? {
                return Ok(());
            }
        }
        updated.save(&app.config_path)?;
        app.config = updated;
        app.ui.success(&format!("Chord timeout set to {ms}ms"));
        let catalog = app.catalog()?;
        if !catalog.is_empty() {
            app.publish(&catalog);
        }
        return Ok(());
    }

    if !show {
        println!("Use --show to see settings or --chord-timeout to change the timeout.");
        return Ok(());
    }
    let config = &app.config;
    app.ui.heading("chordkit configuration");
    println!("  Config file:        {}", app.config_path.display());
    println!("  Chord timeout:      {}ms", config.impulse.chord_timeout_ms);
    println!("  Minimum chord size: {} keys", config.impulse.min_chord_size);
    println!("  Trigger:            {}", config.impulse.trigger_key);
    println!("  Chord storage:      {}", config.chord_file().display());
    println!("  Karabiner config:   {}", config.engine_config().path.display());
    println!("  Karabiner profile:  {}", config.engine.profile_name);
    println!(
        "  Sensitivity:        2 keys {}ms, 3 keys {}ms, 4 keys {}ms, 5+ keys {}ms",
        config.sensitivity.two_keys,
        config.sensitivity.three_keys,
        config.sensitivity.four_keys,
        config.sensitivity.five_plus_keys
    );
    Ok(())
}
