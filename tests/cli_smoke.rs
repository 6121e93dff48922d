use std::fs;
use std::process::Command;

use tempfile::tempdir;

const TRAINING: &str = "sample_id\ttime\tstatus\ttime_upper\tage\tmarker\n\
s1\t2.0\t1\t\t61\t0.4\n\
s2\t5.5\t0\t\t45\t-0.3\n\
s3\t1.1\t1\t\t70\t1.2\n\
s4\t3.0\t3\t4.5\t52\t0.1\n\
s5\t7.2\t1\t\t38\t-1.0\n\
s6\t0.9\t2\t\t66\t0.9\n\
s7\t4.4\t1\t\t49\t-0.2\n\
s8\t6.0\t0\t\t41\t-0.8\n\
s9\t2.7\t1\t\t58\t0.5\n\
s10\t3.9\t1\t\t55\t0.0\n";

#[test]
fn train_predict_and_folds_write_their_outputs() {
    let tmp = tempdir().expect("temporary directory");
    let training_path = tmp.path().join("train.tsv");
    fs::write(&training_path, TRAINING).expect("write training data");
    let training = training_path.to_str().expect("path str");
    let exe = env!("CARGO_BIN_EXE_lifeline");

    let output = Command::new(exe)
        .current_dir(tmp.path())
        .env_remove("RUST_LOG")
        .args(["train", training, "--c1", "0.5", "--max-iterations", "200"])
        .output()
        .expect("run lifeline train");
    assert!(output.status.success(), "train exited with status {:?}", output.status);
    assert!(tmp.path().join("model.toml").exists(), "model.toml missing");
    // Solver step traces are below the default log level.
    assert!(!String::from_utf8_lossy(&output.stderr).contains("[BFGS]"));

    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args(["predict", training, "--model", "model.toml", "--statistic", "median"])
        .status()
        .expect("run lifeline predict");
    assert!(status.success(), "predict exited with status {status:?}");
    let predictions = fs::read_to_string(tmp.path().join("predictions.tsv")).unwrap();
    let mut lines = predictions.lines();
    assert_eq!(lines.next(), Some("sample_id\tmedian_survival_time"));
    assert_eq!(lines.count(), 10);

    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args(["folds", training, "--folds", "3", "--fold-type", "censorstrat"])
        .status()
        .expect("run lifeline folds");
    assert!(status.success(), "folds exited with status {status:?}");
    let folds = fs::read_to_string(tmp.path().join("folds.tsv")).unwrap();
    assert_eq!(folds.lines().count(), 11);
}

#[test]
fn folds_file_keeps_input_row_numbers_when_rows_are_dropped() {
    let tmp = tempdir().expect("temporary directory");
    let path = tmp.path().join("gappy.tsv");
    fs::write(
        &path,
        "time\tstatus\tx\n1.0\t1\t0.2\n2.0\t0\t0.4\n3.0\t1\tNA\n4.0\t1\t0.1\n5.0\t0\t0.9\n",
    )
    .unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_lifeline"))
        .current_dir(tmp.path())
        .args(["folds", path.to_str().unwrap(), "--folds", "2"])
        .status()
        .expect("run lifeline folds");
    assert!(status.success(), "folds exited with status {status:?}");

    let folds = fs::read_to_string(tmp.path().join("folds.tsv")).unwrap();
    let mut lines = folds.lines();
    assert_eq!(lines.next(), Some("row\tfold"));
    let rows: Vec<&str> = lines.map(|l| l.split('\t').next().unwrap()).collect();
    assert_eq!(rows, vec!["1", "2", "4", "5"]);
}

#[test]
fn unknown_status_code_fails_with_exit_code_one() {
    let tmp = tempdir().expect("temporary directory");
    let path = tmp.path().join("bad.tsv");
    fs::write(&path, "time\tstatus\tx\n1.0\t7\t0.5\n2.0\t1\t0.1\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_lifeline"))
        .current_dir(tmp.path())
        .args(["train", path.to_str().unwrap()])
        .output()
        .expect("run lifeline train");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}
