use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_svyts"))
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

fn ok(args: &[&str]) -> Output {
    let out = run(args);
    assert!(
        out.status.success(),
        "{:?} should succeed, stderr={}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    out
}

fn json(out: &Output) -> serde_json::Value {
    serde_json::from_slice(&out.stdout).expect("stdout should be valid JSON")
}

fn s(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

const SMALL_SIM: &str = "persons_per_panel: 200\nn_strata: 10\n";

/// Simulated extracts pooled into `dir/pooled.csv`.
fn pooled_csv(dir: &Path) -> PathBuf {
    let cache = dir.join("cache");
    let sim_cfg = dir.join("sim.yaml");
    std::fs::write(&sim_cfg, SMALL_SIM).unwrap();
    let out = ok(&["simulate", "--out-dir", &s(&cache), "--config", &s(&sim_cfg)]);
    let v = json(&out);
    assert_eq!(v["full_year"].as_array().unwrap().len(), 6);
    assert!(v["records"].as_u64().unwrap() > 0);

    let pooled = dir.join("pooled.csv");
    let out = ok(&["pool", "--cache-dir", &s(&cache), "--pooled", &s(&pooled)]);
    let v = json(&out);
    assert_eq!(v["cutoff"], 2019);
    assert_eq!(v["years"].as_array().unwrap().len(), 6);
    assert_eq!(v["link"]["unmatched"], 0);
    assert!(pooled.is_file());
    pooled
}

#[test]
fn version_contract() {
    let v = json(&ok(&["version"]));
    assert_eq!(v["tool"], "svyts");
    assert!(v["version"].as_str().is_some());
    assert!(v["features"].is_array());
}

#[test]
fn simulate_pool_describe_fit_margins_plot() {
    let dir = tempfile::tempdir().unwrap();
    let pooled = pooled_csv(dir.path());
    let input = s(&pooled);

    let v = json(&ok(&["describe", "-i", &input]));
    assert_eq!(v["frame"]["base_year"], 2016);
    assert_eq!(v["design"]["n_strata"], 10);
    assert_eq!(v["descriptives"]["mean_by_group_time"].as_array().unwrap().len(), 12);

    let results_path = dir.path().join("results.json");
    ok(&["fit", "-i", &input, "-o", &s(&results_path)]);
    let v: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&results_path).unwrap()).unwrap();
    assert_eq!(v["triple"]["fit"]["coefficients"].as_array().unwrap().len(), 7);
    assert_eq!(v["spline"]["fit"]["coefficients"].as_array().unwrap().len(), 8);
    let did = &v["effects"]["did_triple"];
    assert!(did["estimate"].as_f64().unwrap().is_finite());
    assert!(did["ci_lower"].as_f64().unwrap() < did["ci_upper"].as_f64().unwrap());
    assert!(!v["caveats"].as_array().unwrap().is_empty());

    let v = json(&ok(&["fit", "-i", &input, "--model", "spline"]));
    assert_eq!(v["model"]["name"], "spline");
    assert_eq!(v["model"]["margins"]["slopes"].as_array().unwrap().len(), 4);

    let table = ok(&["fit", "-i", &input, "--table"]);
    let text = String::from_utf8_lossy(&table.stdout);
    assert!(text.contains("Survey design"));
    assert!(text.contains("Headline effects"));
    assert!(text.contains("DiD (triple interaction)"));

    let v = json(&ok(&["margins", "-i", &input, "--model", "triple"]));
    assert!(v.get("triple").is_some());
    assert!(v.get("spline").is_none());
    assert_eq!(v["triple"]["group_difference"].as_array().unwrap().len(), 2);

    let svg = dir.path().join("itsa.svg");
    let artifact = dir.path().join("itsa_plot.json");
    let v = json(&ok(&[
        "plot",
        "--results",
        &s(&results_path),
        "-o",
        &s(&svg),
        "--title",
        "Total expenditure",
        "--theme",
        "print",
        "--save-artifact",
        &s(&artifact),
    ]));
    assert_eq!(v["theme"], "print");
    let text = std::fs::read_to_string(&svg).unwrap();
    assert!(text.contains("<svg"));
    assert!(text.contains("Total expenditure"));

    let svg2 = dir.path().join("again.svg");
    ok(&["plot", "--artifact", &s(&artifact), "-o", &s(&svg2)]);
    assert!(std::fs::read_to_string(&svg2).unwrap().contains("Total expenditure"));
}

#[test]
fn run_from_yaml_config() {
    let dir = tempfile::tempdir().unwrap();
    let out_dir = dir.path().join("out");
    let cfg = dir.path().join("run.yaml");
    std::fs::write(
        &cfg,
        format!(
            "out_dir: {}\nsimulate:\n  persons_per_panel: 200\n  n_strata: 10\nlabels:\n  title: Simulated\n",
            s(&out_dir)
        ),
    )
    .unwrap();

    let v = json(&ok(&["run", "--config", &s(&cfg)]));
    assert_eq!(v["source"], "simulate");
    assert_eq!(v["cutoff"], 2019);
    assert_eq!(v["inputs"].as_array().unwrap().len(), 7);
    for name in ["pooled.csv", "results.json", "itsa_plot.json", "itsa.svg", "run.json"] {
        assert!(out_dir.join(name).is_file(), "missing {name}");
    }
    let roles: Vec<&str> =
        v["outputs"].as_array().unwrap().iter().map(|o| o["role"].as_str().unwrap()).collect();
    assert_eq!(roles, vec!["pooled", "results", "plot_artifact", "plot"]);

    let again = run(&["run", "--config", &s(&cfg)]);
    assert!(!again.status.success());
    assert!(String::from_utf8_lossy(&again.stderr).contains("must be empty"));
}

#[test]
fn errors_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.csv");
    let out = run(&["fit", "-i", &s(&missing)]);
    assert!(!out.status.success());

    let out = run(&["plot", "-o", &s(&dir.path().join("x.svg"))]);
    assert!(!out.status.success());

    let pooled = pooled_csv(dir.path());
    let out = run(&["fit", "-i", &s(&pooled), "--outcome", "nosuch"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("nosuch"));
}
