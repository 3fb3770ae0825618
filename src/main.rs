use anyhow::Result;
use clap::Parser;
use log::{error, info};

use mailstats::config::Config;
use mailstats::database::RunHistory;
use mailstats::gmail_client::GmailClient;
use mailstats::pipeline::{RunOptions, RunOutcome, StatsRunner};
use mailstats::server;
use mailstats::stats::request_tracker::RequestTracker;
use mailstats::stats::sampler::SamplingMode;

#[derive(Parser, Debug, Clone)]
#[command(name = "mailstats")]
#[command(about = "Statistiques de boîte Gmail : volume quotidien, expéditeurs et domaines")]
#[command(version = "0.1.0")]
struct Args {
    /// Échantillonnage aléatoire (énumération complète puis tirage uniforme)
    #[arg(long)]
    random_sample: bool,

    /// Nombre maximum de messages examinés (0 = illimité)
    #[arg(long)]
    sample_size: Option<usize>,

    /// Fenêtre d'analyse en jours
    #[arg(long)]
    days: Option<u32>,

    /// Récupération complète des messages pour détecter les pièces jointes
    #[arg(long)]
    attachments: bool,

    /// Export CSV + JSON dans un sous-répertoire daté
    #[arg(long)]
    export: bool,

    /// Rapport HTML autonome
    #[arg(long)]
    html: bool,

    /// Répertoire de sortie des exports (par défaut: OUTPUT_DIR ou ./out)
    #[arg(short = 'o', long)]
    out_dir: Option<String>,

    /// Limiter l'échantillon à un label Gmail (répétable, remplace SAMPLE_LABELS)
    #[arg(long = "label", value_name = "LABEL_ID")]
    label: Vec<String>,

    /// Mode dry-run : aucune écriture dans l'historique des runs
    #[arg(short, long)]
    dry_run: bool,

    /// Afficher les compteurs de tous les labels puis quitter
    #[arg(long)]
    labels: bool,

    /// Lancer uniquement le serveur web sur l'historique
    #[arg(long)]
    serve: bool,

    /// Mode daemon : exécutions planifiées (SCHEDULER_TIMES)
    #[arg(long)]
    daemon: bool,

    /// Vérifier la configuration sans se connecter
    #[arg(long)]
    check_config: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut Config) -> Result<()> {
        if self.random_sample {
            config.sampling.method = SamplingMode::Random;
        }
        if let Some(size) = self.sample_size {
            config.sampling.sample_max_ids = size;
        }
        if let Some(days) = self.days {
            if days == 0 {
                anyhow::bail!("--days doit être >= 1");
            }
            config.sampling.days = days;
        }
        if !self.label.is_empty() {
            config.sampling.labels = self.label.clone();
        }
        if let Some(dir) = &self.out_dir {
            config.report.output_dir = dir.into();
        }
        Ok(())
    }

    fn run_options(&self) -> RunOptions {
        RunOptions {
            attachments: self.attachments,
            export: self.export,
            html: self.html,
            print_dashboard: true,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger le fichier .env s'il existe
    dotenv::dotenv().ok();

    let args = Args::parse();

    // LOG_LEVEL fixe le filtre par défaut, RUST_LOG reste prioritaire
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.to_lowercase())).init();

    let mut config = Config::from_env()?;
    args.apply_overrides(&mut config)?;

    // Le serveur web ne lit que l'historique SQLite
    if !args.serve {
        config.require_gmail()?;
    }

    if args.check_config {
        println!("✅ Configuration valide !");
        println!("📧 Gmail API OAuth2 (lecture seule)");
        println!("🔑 Credentials: {}", config.gmail.credentials_path.as_deref().unwrap_or("-"));
        println!("💾 Token cache: {}", config.gmail.token_cache_path);
        println!(
            "🔎 Requête: {} | échantillon: {} | méthode: {}",
            config.query(),
            config.sampling.sample_max_ids,
            config.sampling.method
        );
        if !config.sampling.labels.is_empty() {
            println!("🏷️  Labels: {}", config.sampling.labels.join(", "));
        }
        println!(
            "📦 Groupes de {} | délai {:.2}s | tentatives max {}",
            config.fetch.batch_size,
            config.fetch.batch_delay.as_secs_f64(),
            config.fetch.retry.max_attempts
        );
        println!("🕒 Fuseau de rapport: {}", config.report.timezone);
        println!("📁 Répertoire de sortie: {}", config.report.output_dir.display());
        if !args.dry_run {
            println!("🗄️  Historique SQLite: {}", config.database.path);
        }
        return Ok(());
    }

    if args.labels {
        let gmail = GmailClient::new(&config.gmail).await?;
        let mut tracker = RequestTracker::new();
        let result = gmail.print_labels(&mut tracker).await;
        tracker.log_totals();
        return result;
    }

    if args.serve {
        let history = RunHistory::new(&config.database).await?;
        return server::serve(history, &config.server).await;
    }

    if args.daemon {
        info!("🔄 Démarrage en mode daemon");
        return run_daemon_mode(config, args).await;
    }

    if args.dry_run {
        info!("🧪 Démarrage en mode DRY-RUN de mailstats");
    } else {
        info!("🚀 Démarrage de mailstats");
    }

    match run_once(config, &args).await {
        Ok(RunOutcome::EmptyWindow) => info!("Aucun message dans la fenêtre demandée"),
        Ok(RunOutcome::Completed(run)) => {
            info!("✅ Analyse terminée avec succès. {} messages examinés.", run.aggregate.messages);
        }
        Err(e) => {
            error!("❌ Erreur lors de l'analyse de la boîte: {:#}", e);
            return Err(e);
        }
    }

    Ok(())
}

async fn run_once(config: Config, args: &Args) -> Result<RunOutcome> {
    let runner = if args.dry_run {
        StatsRunner::new_dry_run(config, args.run_options())
    } else {
        StatsRunner::new(config, args.run_options()).await?
    };
    runner.run().await
}

async fn run_daemon_mode(config: Config, args: Args) -> Result<()> {
    use chrono::{Local, Timelike};
    use tokio_cron_scheduler::{Job, JobScheduler};

    if !config.scheduler.enabled {
        error!("❌ Le mode daemon nécessite SCHEDULER_ENABLED=true dans la configuration");
        anyhow::bail!("Scheduler non activé dans la configuration");
    }

    if config.scheduler.schedule_times.is_empty() {
        error!("❌ Aucun horaire de scheduling défini (SCHEDULER_TIMES)");
        anyhow::bail!("Aucun horaire de scheduling défini");
    }

    info!("📅 Horaires d'analyse configurés : {:?}", config.scheduler.schedule_times);

    let scheduler = JobScheduler::new().await?;

    for schedule_time in &config.scheduler.schedule_times {
        let Some(cron_expr) = cron_for(schedule_time) else {
            error!("❌ Format d'horaire invalide: {}. Utilisez le format HH:MM", schedule_time);
            continue;
        };
        info!("📆 Ajout du job planifié : {} (cron: {})", schedule_time, cron_expr);

        let config = config.clone();
        let args = args.clone();
        let schedule_time = schedule_time.clone();

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
            let config = config.clone();
            let args = args.clone();
            let schedule_time = schedule_time.clone();

            Box::pin(async move {
                info!("⏰ Exécution planifiée à {} - analyse de la boîte...", schedule_time);

                match run_once(config, &args).await {
                    Ok(RunOutcome::EmptyWindow) => {
                        info!("Aucun message à {} - rien à enregistrer", schedule_time);
                    }
                    Ok(RunOutcome::Completed(run)) => {
                        info!(
                            "✅ Analyse planifiée terminée à {}: {} messages examinés",
                            schedule_time, run.aggregate.messages
                        );
                    }
                    Err(e) => {
                        error!("❌ Erreur lors de l'analyse planifiée à {}: {:#}", schedule_time, e);
                    }
                }
            })
        })?;

        scheduler.add(job).await?;
    }

    scheduler.start().await?;

    info!("✅ Mode daemon démarré. En attente des horaires planifiés...");
    info!("⏸️  Appuyez sur Ctrl+C pour arrêter le daemon");

    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;

        let now = Local::now();
        if now.minute() == 0 {
            info!("💓 Daemon actif - {}", now.format("%Y-%m-%d %H:%M"));
        }
    }
}

/// "HH:MM" → six-field cron expression firing daily at that time.
fn cron_for(schedule_time: &str) -> Option<String> {
    let (hour, minute) = schedule_time.split_once(':')?;
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = minute.trim().parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("0 {} {} * * *", minute, hour))
}
