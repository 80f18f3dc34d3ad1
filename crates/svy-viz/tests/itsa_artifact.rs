use svy_data::{
    FetchedExtracts, FrameOptions, LinkageSchema, SimulationConfig, build_pooled, simulate_extracts,
    to_frame,
};
use svy_inference::{DesignSpec, ItsaAnalysis, ItsaResults, SingletonMethod, SurveyDesign};
use svy_viz::{ItsaPlotArtifact, PlotLabels};

fn results() -> ItsaResults {
    let cfg = SimulationConfig { persons_per_panel: 200, n_strata: 10, ..SimulationConfig::default() };
    let dir = tempfile::tempdir().unwrap();
    let sim = simulate_extracts(&cfg, dir.path()).unwrap();
    let extracts = FetchedExtracts { full_year: sim.full_year, linkage: sim.linkage };
    let (pooled, _) = build_pooled(&extracts, cfg.cutoff, &LinkageSchema::default()).unwrap();
    let (frame, _) = to_frame(&pooled, &FrameOptions::default()).unwrap();
    let design = SurveyDesign::new(frame, DesignSpec::meps_pooled(), SingletonMethod::Adjust).unwrap();
    ItsaAnalysis::default().fit(&design).unwrap()
}

#[test]
fn test_artifact_from_simulated_fit() {
    let res = results();
    let art = ItsaPlotArtifact::from_results(&res, &PlotLabels::default());

    assert_eq!(art.cutoff_year, 2019.0);
    assert_eq!(art.y_label, "totexp");
    assert_eq!(art.groups.len(), 2);
    assert_eq!(art.groups[0].label, "Male");
    assert_eq!(art.groups[1].label, "Female");
    for g in &art.groups {
        let years: Vec<f64> = g.means.iter().map(|m| m.year).collect();
        assert_eq!(years, vec![2016.0, 2017.0, 2018.0, 2019.0, 2020.0, 2021.0]);
        assert_eq!(g.pre.first().unwrap().year, 2016.0);
        assert_eq!(g.pre.last().unwrap().year, 2019.0);
        assert_eq!(g.post.first().unwrap().year, 2019.0);
        assert_eq!(g.counterfactual.last().unwrap().year, 2021.0);
        assert!(g.means.iter().all(|m| m.ci_lower <= m.mean && m.mean <= m.ci_upper));
    }
    assert!(art.annotation.as_deref().unwrap().starts_with("DiD "));

    let (x0, x1, y0, y1) = art.data_bounds().unwrap();
    assert_eq!((x0, x1), (2016.0, 2021.0));
    assert!(y0 < y1);
}

#[test]
fn test_artifact_json_roundtrip() {
    let art = ItsaPlotArtifact::from_results(&results(), &PlotLabels::default());
    let json = serde_json::to_string(&art).unwrap();
    let back: ItsaPlotArtifact = serde_json::from_str(&json).unwrap();
    assert_eq!(back.groups.len(), 2);
    assert_eq!(back.meta.schema_version, svy_viz::itsa::SCHEMA_VERSION);
}
