#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use itertools::Itertools;
use ndarray::Array1;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::process;

use lifeline::FitConfig;
use lifeline::curves::predict_curves;
use lifeline::data::{load_prediction_tsv, load_survival_tsv};
use lifeline::estimate::fit;
use lifeline::model::MtlrModel;
use lifeline::stats::{Statistic, predict_statistic};
use lifeline::validate::{CvConfig, FoldType, cross_validate, make_folds};

/// Fit settings shared by `train` and `cv`.
#[derive(Args)]
pub struct SolverArgs {
    /// TOML file with fit settings; flags below override it
    #[arg(long)]
    pub config: Option<String>,

    /// Weight of the penalty on differences between adjacent time columns
    #[arg(long)]
    pub smoothness: Option<f64>,

    /// Maximum number of BFGS iterations
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Gradient-norm tolerance for BFGS convergence
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Explicit, comma-separated time grid (default: quantiles of the observed times)
    #[arg(long, value_delimiter = ',')]
    pub time_points: Option<Vec<f64>>,

    /// Number of grid points for the quantile heuristic (default: ceil(sqrt(N)))
    #[arg(long)]
    pub num_intervals: Option<usize>,
}

impl SolverArgs {
    fn to_config(&self, c1: Option<f64>) -> Result<FitConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => {
                println!("Loading fit settings from: {path}");
                FitConfig::load(path)?
            }
            None => FitConfig::default(),
        };
        if let Some(c1) = c1 {
            config.c1 = c1;
        }
        if let Some(smoothness) = self.smoothness {
            config.smoothness = smoothness;
        }
        if let Some(max_iterations) = self.max_iterations {
            config.max_iterations = max_iterations;
        }
        if let Some(tolerance) = self.tolerance {
            config.tolerance = tolerance;
        }
        if let Some(points) = &self.time_points {
            config.time_points = Some(points.clone());
        }
        if let Some(n) = self.num_intervals {
            config.num_intervals = Some(n);
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
pub struct TrainArgs {
    /// Path to training TSV file with time,status[,time_upper],feature... columns
    pub training_data: String,

    /// Regularization strength C1
    #[arg(long)]
    pub c1: Option<f64>,

    #[command(flatten)]
    pub solver: SolverArgs,

    /// Where to write the fitted model
    #[arg(long, default_value = "model.toml")]
    pub model: String,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StatisticCli {
    /// Full survival curve at every grid point
    Curve,
    Mean,
    Median,
    /// Survival probability at the times given with --times
    ProbAtTime,
    /// Survival probability at each row's own `time` column
    ProbAtEvent,
}

#[derive(Args)]
pub struct PredictArgs {
    /// Path to TSV file with the model's feature columns
    pub test_data: String,

    /// Path to trained model file (.toml)
    #[arg(long)]
    pub model: String,

    #[arg(long, value_enum, default_value_t = StatisticCli::Curve)]
    pub statistic: StatisticCli,

    /// Comma-separated evaluation times for prob-at-time
    #[arg(long, value_delimiter = ',')]
    pub times: Vec<f64>,

    #[arg(long, default_value = "predictions.tsv")]
    pub output: String,
}

#[derive(Args)]
pub struct CvArgs {
    /// Path to training TSV file
    pub training_data: String,

    /// Comma-separated candidate C1 values
    #[arg(
        long = "c1",
        value_delimiter = ',',
        default_value = "0.001,0.01,0.1,1,10,100,1000"
    )]
    pub candidates: Vec<f64>,

    #[arg(long, default_value = "5")]
    pub folds: usize,

    #[arg(long, value_enum, default_value_t = FoldType::FullStrat)]
    pub fold_type: FoldType,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[command(flatten)]
    pub solver: SolverArgs,

    /// Also fit the whole dataset with the best C1 and save it here
    #[arg(long)]
    pub model: Option<String>,
}

#[derive(Args)]
pub struct FoldsArgs {
    /// Path to training TSV file
    pub training_data: String,

    #[arg(long, default_value = "5")]
    pub folds: usize,

    #[arg(long, value_enum, default_value_t = FoldType::FullStrat)]
    pub fold_type: FoldType,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Output file; `row` is the 1-based data row of the input file, so rows dropped
    /// for missing values leave gaps
    #[arg(long, default_value = "folds.tsv")]
    pub output: String,
}

#[derive(Parser)]
#[command(
    name = "lifeline",
    about = "Multi-task logistic regression survival curves",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit an MTLR model to survival data
    #[command(about = "Fit an MTLR model (outputs: model.toml)")]
    Train(TrainArgs),

    /// Predict survival curves or statistics for new rows
    #[command(about = "Predict with a fitted model (outputs: predictions.tsv)")]
    Predict(PredictArgs),

    /// Choose C1 by k-fold cross-validation
    #[command(about = "Cross-validate candidate C1 values")]
    Cv(CvArgs),

    /// Write the fold assignment used by cross-validation
    #[command(about = "Assign subjects to folds (outputs: folds.tsv)")]
    Folds(FoldsArgs),
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info,wolfe_bfgs=warn"),
    )
    .init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Train(args)) => train(args),
        Some(Commands::Predict(args)) => predict(args),
        Some(Commands::Cv(args)) => run_cv(args),
        Some(Commands::Folds(args)) => run_folds(args),
        None => Cli::command().print_help().map_err(|e| e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn train(args: TrainArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.solver.to_config(args.c1)?;
    println!("Loading training data from: {}", args.training_data);
    let data = load_survival_tsv(&args.training_data)?;
    println!(
        "Loaded {} subjects with {} features",
        data.n_subjects(),
        data.n_features()
    );

    println!("Training MTLR model with C1 = {}...", config.c1);
    let outcome = fit(&data, &config)?;
    if let Some(warning) = &outcome.warning {
        println!("Warning: {warning}");
    }
    outcome.model.save(&args.model)?;
    println!("Model saved to: {}", args.model);
    Ok(())
}

fn predict(args: PredictArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading model from: {}", args.model);
    let model = MtlrModel::load(&args.model)?;
    println!("Loading prediction data from: {}", args.test_data);
    let table = load_prediction_tsv(&args.test_data, &model.feature_names)?;
    println!("Loaded {} rows for prediction", table.sample_ids.len());

    let (columns, rows) = match statistic_for(&args, table.times.as_ref())? {
        None => {
            let curves = predict_curves(&model, table.features.view())?.curves;
            let columns = curves
                .times()
                .iter()
                .map(|t| format!("survival_at_{t}"))
                .collect::<Vec<_>>();
            let rows = (0..curves.num_curves())
                .map(|i| curves.curve(i).to_vec())
                .collect::<Vec<_>>();
            (columns, rows)
        }
        Some(statistic) => {
            let prediction = predict_statistic(&model, table.features.view(), &statistic)?;
            let rows = prediction
                .values
                .outer_iter()
                .map(|r| r.to_vec())
                .collect::<Vec<_>>();
            (prediction.columns, rows)
        }
    };

    let mut file = BufWriter::new(File::create(&args.output)?);
    writeln!(file, "sample_id\t{}", columns.join("\t"))?;
    for (id, values) in table.sample_ids.iter().zip(rows) {
        writeln!(file, "{id}\t{}", values.iter().map(|v| format!("{v:.6}")).join("\t"))?;
    }
    file.flush()?;
    println!("Predictions saved to: {}", args.output);
    Ok(())
}

/// The statistic requested on the command line, or `None` for full curves.
fn statistic_for(
    args: &PredictArgs,
    event_times: Option<&Array1<f64>>,
) -> Result<Option<Statistic>, Box<dyn std::error::Error>> {
    let statistic = match args.statistic {
        StatisticCli::Curve => return Ok(None),
        StatisticCli::Mean => Statistic::Mean,
        StatisticCli::Median => Statistic::Median,
        StatisticCli::ProbAtTime => {
            if args.times.is_empty() {
                return Err("prob-at-time needs at least one value in --times".into());
            }
            Statistic::ProbAtTime(args.times.clone())
        }
        StatisticCli::ProbAtEvent => {
            let times =
                event_times.ok_or("prob-at-event needs a `time` column in the prediction file")?;
            Statistic::ProbAtEvent(times.to_vec())
        }
    };
    Ok(Some(statistic))
}

fn run_cv(args: CvArgs) -> Result<(), Box<dyn std::error::Error>> {
    let fit_config = args.solver.to_config(None)?;
    println!("Loading training data from: {}", args.training_data);
    let data = load_survival_tsv(&args.training_data)?;

    let config = CvConfig {
        candidates: args.candidates,
        nfolds: args.folds,
        fold_type: args.fold_type,
        seed: args.seed,
        fit: fit_config,
    };
    let result = cross_validate(&data, &config)?;

    println!("c1\tloss");
    for (c1, loss) in result.candidates.iter().zip(&result.per_candidate_loss) {
        println!("{c1}\t{loss:.6}");
    }
    if result.convergence_warnings > 0 {
        println!(
            "Warning: {} fold fits stopped before converging",
            result.convergence_warnings
        );
    }
    println!("Best C1: {}", result.best_c1);

    if let Some(path) = args.model {
        println!("Training final model with C1 = {}...", result.best_c1);
        let outcome = fit(&data, &config.fit.with_c1(result.best_c1))?;
        if let Some(warning) = &outcome.warning {
            println!("Warning: {warning}");
        }
        outcome.model.save(&path)?;
        println!("Model saved to: {path}");
    }
    Ok(())
}

fn run_folds(args: FoldsArgs) -> Result<(), Box<dyn std::error::Error>> {
    println!("Loading training data from: {}", args.training_data);
    let data = load_survival_tsv(&args.training_data)?;
    let folds = make_folds(&data, args.folds, args.fold_type, args.seed)?;

    let mut file = BufWriter::new(File::create(&args.output)?);
    writeln!(file, "row\tfold")?;
    for (row, fold) in data.source_rows().iter().zip(folds.as_slice()) {
        writeln!(file, "{}\t{fold}", row + 1)?;
    }
    file.flush()?;
    println!("Fold sizes: {:?}", folds.sizes());
    println!("Folds saved to: {}", args.output);
    Ok(())
}
