use svy_viz::itsa::{GroupSeries, ItsaPlotArtifact, ItsaPlotMeta, LinePoint, MeanPoint};
use svy_viz_render::config::{VizConfig, resolve_config};
use svy_viz_render::{Format, PlotKind, RenderError, render_svg, render_to_bytes, render_to_file};

fn line(years: std::ops::RangeInclusive<i32>, intercept: f64, slope: f64) -> Vec<LinePoint> {
    years
        .map(|y| {
            let fit = intercept + slope * f64::from(y - 2016);
            LinePoint { year: f64::from(y), fit, ci_lower: fit - 150.0, ci_upper: fit + 150.0 }
        })
        .collect()
}

fn group(g: f64, label: &str, level: f64) -> GroupSeries {
    GroupSeries {
        group: g,
        label: label.into(),
        means: (2016..=2021)
            .map(|y| {
                let mean = level + 200.0 * f64::from(y - 2016);
                MeanPoint {
                    year: f64::from(y),
                    mean,
                    ci_lower: mean - 300.0,
                    ci_upper: mean + 300.0,
                    n: 500,
                }
            })
            .collect(),
        pre: line(2016..=2019, level, 200.0),
        post: line(2019..=2021, level + 300.0, 260.0),
        counterfactual: line(2019..=2021, level, 200.0)
            .into_iter()
            .map(|p| LinePoint { fit: p.fit + 600.0, ..p })
            .collect(),
    }
}

fn artifact_json() -> String {
    let art = ItsaPlotArtifact {
        meta: ItsaPlotMeta {
            tool: "svyts".into(),
            tool_version: "test".into(),
            schema_version: svy_viz::itsa::SCHEMA_VERSION.into(),
            outcome: "totexp".into(),
            level: 0.95,
        },
        title: "Total expenditure & sex".into(),
        x_label: "Year".into(),
        y_label: "Mean total expenditure ($)".into(),
        cutoff_year: 2019.0,
        intervention_label: "2019".into(),
        groups: vec![group(0.0, "Male", 5200.0), group(1.0, "Female", 6300.0)],
        annotation: Some("DiD 256.0 (95% CI 100.0 to 412.0), p = 0.002".into()),
    };
    serde_json::to_string(&art).unwrap()
}

fn draw(json: &str, cfg: &VizConfig) -> String {
    render_svg(json, PlotKind::Itsa, cfg).unwrap()
}

#[test]
fn every_layer_is_drawn() {
    let svg = draw(&artifact_json(), &VizConfig::default());
    assert!(svg.starts_with("<svg"));
    assert!(svg.contains("Total expenditure &amp; sex"));
    for label in ["Male", "Female", "Counterfactual", "95% CI", "2016", "2021"] {
        assert!(svg.contains(&format!(">{label}</text>")), "missing {label}");
    }
    assert!(svg.contains("DiD 256.0"));
    // Counterfactuals dashed, intervention line dotted.
    assert!(svg.contains(r#"stroke-dasharray="6 3""#));
    assert!(svg.contains(r#"stroke-dasharray="1.5 2.5""#));
    assert_eq!(svg.matches("<g ").count(), svg.matches("</g>").count());
    // A band per fitted segment per group.
    assert_eq!(svg.matches("<path ").count(), 4);
    // Two groups with pre, post and counterfactual lines each.
    assert_eq!(svg.matches("<polyline ").count(), 6);
}

#[test]
fn bands_sit_below_lines_and_means_on_top() {
    let svg = draw(&artifact_json(), &VizConfig::default());
    let first = |pat: &str| svg.find(pat).unwrap();
    assert!(first("<path ") < first("<polyline "));
    assert!(first("<polyline ") < first("<circle "));
    assert!(first("<circle ") < first("DiD 256.0"));
}

#[test]
fn layers_can_be_switched_off() {
    let cfg = resolve_config(Some(
        "layers:\n  bands: false\n  counterfactual: false\n  annotation: false\n  means: false\n",
    ))
    .unwrap();
    let svg = draw(&artifact_json(), &cfg);
    assert_eq!(svg.matches("<path ").count(), 0);
    assert_eq!(svg.matches("<polyline ").count(), 4);
    assert!(!svg.contains("<circle "));
    assert!(!svg.contains("Counterfactual"));
    assert!(!svg.contains("DiD 256.0"));
    assert!(!svg.contains(r#"stroke-dasharray="6 3""#));
}

#[test]
fn header_override_and_hide() {
    let cfg = resolve_config(Some("header:\n  title: Custom\n  subtitle: MEPS 2016-2021\n")).unwrap();
    let svg = draw(&artifact_json(), &cfg);
    assert!(svg.contains(">Custom</text>"));
    assert!(svg.contains(">MEPS 2016-2021</text>"));
    assert!(!svg.contains("Total expenditure"));

    let svg = draw(&artifact_json(), &resolve_config(Some("theme: minimal\n")).unwrap());
    assert!(!svg.contains("Total expenditure"));
}

#[test]
fn print_theme_is_grayscale() {
    let cfg = resolve_config(Some("theme: print\n")).unwrap();
    let svg = draw(&artifact_json(), &cfg);
    assert!(svg.contains(r##"stroke="#111111""##));
    assert!(!svg.contains("#1d4ed8"));
}

#[test]
fn empty_artifact_renders_placeholder() {
    let mut art: ItsaPlotArtifact = serde_json::from_str(&artifact_json()).unwrap();
    art.groups.clear();
    let cfg = VizConfig::default();
    let svg = draw(&serde_json::to_string(&art).unwrap(), &cfg);
    assert!(svg.contains("No ITSA data"));
    assert!(svg.contains(r#"viewBox="0 0 518.4 324""#));
}

#[test]
fn unknown_kind_and_format() {
    let json = artifact_json();
    assert!(matches!("pulls".parse::<PlotKind>(), Err(RenderError::UnknownKind(_))));
    assert!(matches!("gif".parse::<Format>(), Err(RenderError::UnknownFormat(_))));
    assert!(matches!(
        render_svg("{", PlotKind::Itsa, &VizConfig::default()),
        Err(RenderError::Deserialize(_))
    ));
    let dir = tempfile::tempdir().unwrap();
    let gif = dir.path().join("itsa.gif");
    assert!(matches!(
        render_to_file(&json, PlotKind::Itsa, &gif, &VizConfig::default()),
        Err(RenderError::UnknownFormat(_))
    ));
    assert!(!gif.exists());
}

#[test]
fn file_format_from_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("itsa.SVG");
    render_to_file(&artifact_json(), PlotKind::Itsa, &path, &VizConfig::default()).unwrap();
    assert!(std::fs::read_to_string(&path).unwrap().ends_with("</svg>\n"));

    let no_ext = dir.path().join("itsa");
    render_to_file(&artifact_json(), PlotKind::Itsa, &no_ext, &VizConfig::default()).unwrap();
    assert!(std::fs::read_to_string(&no_ext).unwrap().starts_with("<svg"));
}

#[cfg(not(feature = "png"))]
#[test]
fn png_needs_the_feature() {
    let out = render_to_bytes(&artifact_json(), PlotKind::Itsa, Format::Png, &VizConfig::default());
    assert!(matches!(out, Err(RenderError::PngDisabled)));
}

#[cfg(feature = "png")]
#[test]
fn png_has_signature() {
    let bytes =
        render_to_bytes(&artifact_json(), PlotKind::Itsa, Format::Png, &VizConfig::default())
            .unwrap();
    assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
}
