use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use rafo_cluster::DbscanConfig;
use rafo_ged::{
    CacheKey, EditScope, GedConfig, MatrixCache, NanSubstitute, NoCache, TimeoutPolicy, TreeGraph,
};
use rafo_io::{DatasetReader, DiskCache, ExperimentName, LabelledDataset, ResultWriter};
use rafo_pipeline::{Clustering, ModelOrchestrator, PipelineConfig, Preset};

#[derive(Parser)]
#[command(name = "rafoview")]
#[command(about = "Cluster the trees of a random forest by structural similarity")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// RNG seed for the forest and the embedding (preset default: 123)
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Enable verbose (debug-level) logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Number of threads for parallel computation (defaults to all cores)
    #[arg(long, global = true)]
    threads: Option<usize>,
}

/// Where the data comes from and how the forest is trained.
#[derive(Args, Debug, Clone)]
struct ForestArgs {
    /// Path to the input CSV file (numeric features plus one class column)
    #[arg(long)]
    data: PathBuf,

    /// Class column name (defaults to the last column)
    #[arg(long)]
    target: Option<String>,

    /// Number of trees in the forest
    #[arg(long)]
    n_trees: Option<usize>,

    /// Maximum tree depth
    #[arg(long)]
    max_depth: Option<usize>,

    /// Fraction of rows held out from training
    #[arg(long)]
    test_fraction: Option<f64>,
}

/// Graph edit distance budget and NaN repair.
#[derive(Args, Debug, Clone)]
struct DistanceArgs {
    /// Per-pair edit distance budget in milliseconds
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,

    /// Keep the best edit path found on timeout instead of marking the pair undefined
    #[arg(long, default_value_t = false)]
    best_so_far: bool,

    /// Search every node mapping instead of top-down mappings only (slow on deep trees)
    #[arg(long, default_value_t = false)]
    full_search: bool,

    /// Value for timed-out pairs: "squared-max", "max", or a number
    #[arg(long, default_value = "squared-max", value_parser = parse_nan_substitute)]
    nan_substitute: NanSubstitute,
}

/// DBSCAN and t-SNE overrides on top of the preset.
#[derive(Args, Debug, Clone)]
struct ClusterArgs {
    /// Hyperparameter preset: "iris" or "digits"
    #[arg(long, default_value = "iris", value_parser = parse_preset)]
    preset: Preset,

    /// DBSCAN neighbourhood radius
    #[arg(long)]
    eps: Option<f64>,

    /// DBSCAN core size, counting the tree itself
    #[arg(long)]
    min_samples: Option<usize>,

    /// t-SNE learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// t-SNE perplexity (clamped to n_trees - 1 for small forests)
    #[arg(long)]
    perplexity: Option<f64>,

    /// t-SNE early exaggeration factor
    #[arg(long)]
    early_exaggeration: Option<f64>,
}

/// Output naming.
#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Experiment name for output files (must match [a-zA-Z0-9_-]+)
    #[arg(long)]
    experiment: String,

    /// Output directory for result files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Train a forest, compute tree distances, then cluster, embed, and score the trees
    Run {
        #[command(flatten)]
        forest: ForestArgs,

        #[command(flatten)]
        distance: DistanceArgs,

        #[command(flatten)]
        cluster: ClusterArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Dataset name keying the distance matrix cache (defaults to the preset name)
        #[arg(long)]
        dataset: Option<String>,

        /// Directory of the distance matrix cache
        #[arg(long, default_value = "cache")]
        cache_dir: PathBuf,

        /// Always recompute the distance matrix and leave the cache untouched
        #[arg(long, default_value_t = false)]
        no_cache: bool,
    },

    /// Re-run clustering, embedding, and scoring on a cached distance matrix
    Recluster {
        #[command(flatten)]
        cluster: ClusterArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Dataset name the matrix was cached under (defaults to the preset name)
        #[arg(long)]
        dataset: Option<String>,

        /// Number of trees in the cached forest (defaults to the preset's)
        #[arg(long)]
        n_trees: Option<usize>,

        /// Directory of the distance matrix cache
        #[arg(long, default_value = "cache")]
        cache_dir: PathBuf,
    },

    /// Train a forest and write one of its trees as Graphviz DOT
    ExportDot {
        #[command(flatten)]
        forest: ForestArgs,

        #[command(flatten)]
        output: OutputArgs,

        /// Hyperparameter preset: "iris" or "digits"
        #[arg(long, default_value = "iris", value_parser = parse_preset)]
        preset: Preset,

        /// Index of the tree to export
        #[arg(long, default_value_t = 0)]
        tree: usize,
    },
}

#[derive(Serialize)]
struct RunOutput {
    experiment: String,
    dataset: String,
    n_samples: usize,
    n_trees: usize,
    n_clusters: usize,
    n_noise: usize,
    cluster_silhouette: f64,
    percent_clustered: f64,
    n_undefined: usize,
    distance_matrix_seconds: f64,
    matrix_from_cache: bool,
    trees_file: PathBuf,
    distance_file: PathBuf,
}

#[derive(Serialize)]
struct ReclusterOutput {
    experiment: String,
    dataset: String,
    n_trees: usize,
    eps: f64,
    min_samples: usize,
    n_clusters: usize,
    n_noise: usize,
    cluster_silhouette: f64,
    percent_clustered: f64,
    trees_file: PathBuf,
}

#[derive(Serialize)]
struct ExportDotOutput {
    experiment: String,
    tree: usize,
    n_nodes: usize,
    dot_file: PathBuf,
}

fn parse_nan_substitute(s: &str) -> Result<NanSubstitute, String> {
    match s {
        "squared-max" => Ok(NanSubstitute::SquaredMax),
        "max" => Ok(NanSubstitute::Max),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(NanSubstitute::Constant)
            .ok_or_else(|| {
                format!("expected squared-max, max, or a non-negative number, got {other:?}")
            }),
    }
}

fn parse_preset(s: &str) -> Result<Preset, String> {
    s.parse().map_err(|e: rafo_pipeline::PipelineError| e.to_string())
}

fn read_dataset(args: &ForestArgs) -> Result<LabelledDataset> {
    let mut reader = DatasetReader::new(&args.data);
    if let Some(target) = &args.target {
        reader = reader.with_target(target.clone());
    }
    reader.read().context("failed to read input CSV")
}

/// Preset configuration with every command-line override applied.
fn build_config(
    preset: Preset,
    forest: Option<&ForestArgs>,
    cluster: Option<&ClusterArgs>,
    seed: Option<u64>,
) -> Result<PipelineConfig> {
    let base = PipelineConfig::for_preset(preset);

    let mut params = *base.forest();
    if let Some(args) = forest {
        if let Some(n) = args.n_trees {
            params = params.with_n_trees(n);
        }
        if let Some(depth) = args.max_depth {
            params = params.with_max_depth(depth);
        }
        if let Some(fraction) = args.test_fraction {
            params = params.with_test_fraction(fraction);
        }
    }
    if let Some(seed) = seed {
        params = params.with_seed(seed);
    }

    let defaults = *base.cluster();
    let mut dbscan = defaults.dbscan;
    let mut tsne = defaults.tsne;
    if let Some(args) = cluster {
        dbscan = DbscanConfig::new(
            args.eps.unwrap_or(dbscan.eps()),
            args.min_samples.unwrap_or(dbscan.min_samples()),
        )
        .context("invalid clustering parameters")?;
        tsne = tsne
            .with_learning_rate(args.learning_rate.unwrap_or(tsne.learning_rate()))
            .with_perplexity(args.perplexity.unwrap_or(tsne.perplexity()))
            .with_early_exaggeration(args.early_exaggeration.unwrap_or(tsne.early_exaggeration()));
    }
    if let Some(seed) = seed {
        tsne = tsne.with_seed(seed);
    }

    Ok(base.with_forest(params).with_dbscan(dbscan).with_tsne(tsne))
}

fn writer(output: &OutputArgs) -> Result<ResultWriter> {
    let experiment = ExperimentName::new(output.experiment.clone())?;
    ResultWriter::new(&output.output_dir, experiment).context("failed to prepare output directory")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match (cli.verbose, cli.quiet) {
        (true, _) => "debug",
        (_, true) => "error",
        _ => "info",
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("failed to configure thread pool")?;
        info!(threads, "thread pool configured");
    }

    match cli.command {
        Command::Run {
            forest,
            distance,
            cluster,
            output,
            dataset,
            cache_dir,
            no_cache,
        } => {
            let data = read_dataset(&forest)?;
            let policy = if distance.best_so_far {
                TimeoutPolicy::BestSoFar
            } else {
                TimeoutPolicy::Undefined
            };
            let scope = if distance.full_search {
                EditScope::Full
            } else {
                EditScope::TopDown
            };
            let mut config = build_config(cluster.preset, Some(&forest), Some(&cluster), cli.seed)?
                .with_ged(
                    GedConfig::new()
                        .with_timeout(Duration::from_millis(distance.timeout_ms))
                        .with_timeout_policy(policy)
                        .with_scope(scope),
                )
                .with_nan_substitute(distance.nan_substitute);
            if let Some(name) = dataset {
                config = config.with_dataset(name);
            }
            let dataset_name = config.dataset().to_string();

            let mut disk = DiskCache::new(&cache_dir);
            let mut bypass = NoCache;
            let cache: &mut dyn MatrixCache = if no_cache { &mut bypass } else { &mut disk };
            let orchestrator = ModelOrchestrator::train(
                data.features(),
                data.labels(),
                data.feature_names(),
                config,
                cache,
            )
            .context("pipeline run failed")?;
            let result = orchestrator.result();

            let writer = writer(&output)?;
            let trees_file = writer.write_run(result)?;
            let distance_file = writer.write_distance(result.matrix())?;

            let summary = RunOutput {
                experiment: output.experiment,
                dataset: dataset_name,
                n_samples: data.n_samples(),
                n_trees: result.n_trees(),
                n_clusters: result.assignment().n_clusters(),
                n_noise: result.assignment().noise_count(),
                cluster_silhouette: result.scores().cluster_score,
                percent_clustered: result.scores().percent_clustered,
                n_undefined: result.n_undefined(),
                distance_matrix_seconds: result.matrix_elapsed().as_secs_f64(),
                matrix_from_cache: result.matrix_from_cache(),
                trees_file,
                distance_file,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Recluster {
            cluster,
            output,
            dataset,
            n_trees,
            cache_dir,
        } => {
            let config = build_config(cluster.preset, None, Some(&cluster), cli.seed)?;
            let dataset = dataset.unwrap_or_else(|| config.dataset().to_string());
            let key = CacheKey::new(dataset.clone(), n_trees.unwrap_or(config.forest().n_trees()));
            let matrix = DiskCache::new(&cache_dir)
                .load(&key)?
                .with_context(|| no_cached_matrix(&cache_dir, &key))?;
            let clustering =
                Clustering::compute(&matrix, *config.cluster()).context("reclustering failed")?;
            let params = clustering.params();

            let trees_file = writer(&output)?.write_clustering(&clustering)?;

            let summary = ReclusterOutput {
                experiment: output.experiment,
                dataset,
                n_trees: matrix.len(),
                eps: params.dbscan.eps(),
                min_samples: params.dbscan.min_samples(),
                n_clusters: clustering.assignment().n_clusters(),
                n_noise: clustering.assignment().noise_count(),
                cluster_silhouette: clustering.scores().cluster_score,
                percent_clustered: clustering.scores().percent_clustered,
                trees_file,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::ExportDot {
            forest,
            output,
            preset,
            tree,
        } => {
            let data = read_dataset(&forest)?;
            let config = build_config(preset, Some(&forest), None, cli.seed)?;
            let (fitted, _, _, _) = config
                .forest()
                .fit_holdout(data.features(), data.labels(), data.feature_names())
                .context("forest training failed")?;
            let estimator = fitted
                .tree(tree)
                .with_context(|| {
                    format!("tree {tree} out of range for {} trees", fitted.n_trees())
                })?;
            let graph = TreeGraph::from_tree(tree, estimator, fitted.feature_names())?;

            let dot_file = writer(&output)?.write_dot(tree, &graph)?;
            let summary = ExportDotOutput {
                experiment: output.experiment,
                tree,
                n_nodes: graph.n_nodes(),
                dot_file,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn no_cached_matrix(cache_dir: &Path, key: &CacheKey) -> String {
    format!(
        "no cached distance matrix for {key} in {}; run `rafoview run` first",
        cache_dir.display()
    )
}
