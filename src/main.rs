use blood_search::adapters::{AmqpConfig, AmqpQueue, DisabledNotifier, SendGridNotifier, SqliteStore};
use blood_search::core::drain::NotificationTemplate;
use blood_search::core::geocoder::{BranchLocator, HttpGeocoder};
use blood_search::core::scheduler::start_daily_worker;
use blood_search::domain::ports::Notifier;
use blood_search::utils::error::{BloodSearchError, ErrorSeverity};
use blood_search::utils::{logger, validation::Validate};
use blood_search::{CliConfig, QueueDrainer, RequestProcessor, ServiceConfig};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting blood-search");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    if let Err(e) = run(cli).await {
        tracing::error!(
            "❌ blood-search failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

async fn run(cli: CliConfig) -> Result<(), BloodSearchError> {
    // 載入並驗證配置
    let config = ServiceConfig::from_file(&cli.config)?;
    config.validate()?;
    let daily_at = config.daily_at()?;
    let call_timeout = config.call_timeout();
    tracing::info!(config = %cli.config, "📋 Configuration loaded");

    let store = SqliteStore::connect(&config.database.url, config.database.max_connections).await?;
    if cli.skip_migrations {
        tracing::info!("Skipping database migrations");
    } else {
        store.migrate().await?;
    }

    // 常駐模式下 broker 暫時無法連線不結束服務，每日排程會重新連線
    let queue_config = AmqpConfig::new(&config.queue.url, &config.queue.name);
    let queue = if cli.once {
        AmqpQueue::connect(queue_config).await?
    } else {
        let queue = AmqpQueue::new(queue_config)?;
        if let Err(e) = queue.verify_connection().await {
            tracing::warn!("⚠️ Message broker unavailable at startup, will retry on the next run: {}", e);
        }
        queue
    };

    let geocoder = HttpGeocoder::new(&config.geocoder.endpoint, &config.geocoder.api_key, call_timeout)?;
    let locator = if config.geocoder.cache_branches {
        BranchLocator::new(geocoder)
    } else {
        BranchLocator::uncached(geocoder)
    };

    let notifier: Box<dyn Notifier> = match (
        config.notification.enabled,
        &config.notification.api_key,
        &config.notification.from_email,
    ) {
        (true, Some(api_key), Some(from_email)) => Box::new(SendGridNotifier::new(
            &config.notification.endpoint,
            api_key,
            from_email,
            &config.notification.from_name,
            call_timeout,
        )?),
        _ => {
            tracing::warn!("📭 Email notifications disabled");
            Box::new(DisabledNotifier)
        }
    };
    let template = NotificationTemplate {
        subject: config.notification.subject.clone(),
        body: config.notification.body.clone(),
    };

    let processor = RequestProcessor::new(store.clone(), locator, config.matching.max_distance_km, call_timeout);
    let drainer = Arc::new(QueueDrainer::new(queue, processor, notifier, template, call_timeout));

    let outcome = if cli.once {
        tracing::info!("🩸 Draining the request queue once");
        drainer.drain().await.map(|report| {
            tracing::info!("✅ Drain completed: {:?}", report);
            println!(
                "✅ Processed {} requests: {} fulfilled, {} re-queued, {} expired",
                report.fetched, report.fulfilled, report.requeued, report.expired
            );
        })
    } else {
        let worker = start_daily_worker(Arc::clone(&drainer), daily_at);
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("🛑 Shutdown signal received"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
        worker.abort();
        let _ = worker.await;
        Ok(())
    };

    drainer.queue().close().await;
    store.close().await;
    tracing::info!("👋 blood-search stopped");
    outcome
}
