use std::sync::Arc;

use chrono::Utc;

use taskboard::config::BoardConfig;
use taskboard::core::{DerivedStatus, Scope};
use taskboard::sync::{
    AcceptDefault, HttpRecordService, LogSink, MutationOutcome, MutationPipeline, SyncCache,
};

/// What the command line asked for.
enum Action {
    Show,
    Watch,
    Complete(String),
    Reopen(String),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = BoardConfig::load_default()?;

    // Log to the systemd user journal (`journalctl --user -t taskboard -f`).
    // Wrapper filters: taskboard crate at info/debug (per config), everything else at warn.
    {
        struct FilteredJournal {
            inner: systemd_journal_logger::JournalLog,
        }

        impl log::Log for FilteredJournal {
            fn enabled(&self, metadata: &log::Metadata) -> bool {
                if metadata.target().starts_with("taskboard") {
                    let max = if taskboard::debug_logging() {
                        log::LevelFilter::Debug
                    } else {
                        log::LevelFilter::Info
                    };
                    metadata.level() <= max
                } else {
                    metadata.level() <= log::LevelFilter::Warn
                }
            }
            fn log(&self, record: &log::Record) {
                if self.enabled(record.metadata()) {
                    self.inner.log(record);
                }
            }
            fn flush(&self) {
                self.inner.flush();
            }
        }

        let journal = systemd_journal_logger::JournalLog::new()?
            .with_syslog_identifier("taskboard".to_string());

        taskboard::set_debug_logging(config.debug_logging);

        log::set_boxed_logger(Box::new(FilteredJournal { inner: journal }))?;
        log::set_max_level(log::LevelFilter::Debug);
    }

    // Parse CLI flags
    let args: Vec<String> = std::env::args().collect();
    let flag_value = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };
    let action = if let Some(id) = flag_value("--complete") {
        Action::Complete(id)
    } else if let Some(id) = flag_value("--reopen") {
        Action::Reopen(id)
    } else if args.iter().any(|a| a == "--watch") {
        Action::Watch
    } else {
        Action::Show
    };

    let service = HttpRecordService::new(&config.base_url, config.token(), config.user_id.clone())?;
    let cache = SyncCache::new(Arc::new(service), config.cache_settings(), Arc::new(LogSink));
    if args.iter().any(|a| a == "--all") {
        cache.set_scope(Scope::All).await.ok();
    }
    if let Some(term) = flag_value("--search") {
        cache.set_search_term(term);
        tokio::time::sleep(cache.settings().search_debounce * 2).await;
    }

    if let Err(e) = cache.refresh().await {
        if e.is_auth() {
            eprintln!("Not logged in: set {} to a valid token", config.token_env);
            return Ok(());
        }
        eprintln!("Could not load tasks: {}", e);
    }

    match action {
        Action::Show => print_board(&cache),
        Action::Watch => {
            let poller = cache.start();
            let mut ticker = tokio::time::interval(cache.settings().items_interval);
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    _ = ticker.tick() => print_board(&cache),
                }
            }
            poller.stop().await;
        }
        Action::Complete(id) => set_completion(&cache, &id, true).await?,
        Action::Reopen(id) => set_completion(&cache, &id, false).await?,
    }

    Ok(())
}

async fn set_completion(
    cache: &SyncCache,
    id: &str,
    completed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = MutationPipeline::new(cache.clone(), Arc::new(AcceptDefault));
    match pipeline.set_completion(id, completed, None, Utc::now()).await? {
        MutationOutcome::Committed { due: Some(due), .. } => {
            println!("Task {} updated, due {}", id, due.format("%Y-%m-%d %H:%M"));
        }
        MutationOutcome::Committed { .. } => println!("Task {} updated", id),
        MutationOutcome::Abandoned => println!("Task {} left unchanged", id),
    }
    print_board(cache);
    Ok(())
}

fn print_board(cache: &SyncCache) {
    let board = cache.board(Utc::now());
    let counts = board.index.counts();
    println!(
        "{} tasks: {} pending, {} overdue, {} completed, {} deleted",
        counts.total, counts.pending, counts.overdue, counts.completed, counts.deleted
    );
    if board.auth_required {
        println!("(not logged in: polling paused)");
    } else if let Some(error) = &board.error {
        println!("(showing last loaded tasks: {})", error);
    }
    for status in DerivedStatus::ALL {
        let items = board.items_in(status);
        println!("\n{} ({})", status.label(), items.len());
        for item in items {
            match item.due() {
                Some(due) => println!("  [{}] {}  (due {})", item.id, item.title(), due.format("%d/%m/%Y %H:%M")),
                None => println!("  [{}] {}", item.id, item.title()),
            }
        }
    }
}
