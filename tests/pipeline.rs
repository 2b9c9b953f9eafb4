//! End-to-end build over a temporary project.
//!
//! Templates here are already MJML, rendered by a pass-through engine, so
//! the test needs no `pug` installation. MJML compilation and minification
//! run for real.

use pugmail::compile::MrmlCompiler;
use pugmail::config::{BuildConfig, PathsConfig};
use pugmail::output;
use pugmail::pipeline::{Pipeline, PipelineError, Stage};
use pugmail::render::{TemplateEngine, TemplateError};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

struct Passthrough;

impl TemplateEngine for Passthrough {
    fn render(&self, source: &str, _path: &Path) -> Result<String, TemplateError> {
        Ok(source.to_string())
    }
}

const WELCOME: &str = r#"<mjml>
  <mj-head>
    <mj-title>Welcome</mj-title>
  </mj-head>
  <mj-body>
    <mj-section>
      <mj-column>
        <mj-image src="https://example.com/logo.png" alt="Logo" />
        <mj-text font-size="16px">Hello and welcome.</mj-text>
        <mj-button href="https://example.com">Get started</mj-button>
      </mj-column>
    </mj-section>
  </mj-body>
</mjml>
"#;

fn project(root: &Path) -> BuildConfig {
    let config = BuildConfig {
        paths: PathsConfig {
            source: root.join("src"),
            intermediate: root.join("src/mjml"),
            output: root.join("dist"),
        },
        ..BuildConfig::default()
    };
    fs::create_dir_all(&config.paths.source).unwrap();
    config
}

#[test]
fn full_build_produces_compiled_and_minified_documents() {
    let tmp = TempDir::new().unwrap();
    let config = project(tmp.path());
    fs::write(config.paths.source.join("welcome.pug"), WELCOME).unwrap();
    let compiler = MrmlCompiler::new(&config.mjml);

    let mut pipeline = Pipeline::new(&config, &Passthrough, &compiler);
    let summary = pipeline.build().unwrap();

    let markup = config.paths.intermediate.join("welcome.mjml");
    assert_eq!(fs::read_to_string(&markup).unwrap(), WELCOME);

    let html = fs::read_to_string(config.paths.output.join("welcome.html")).unwrap();
    assert!(html.contains("Hello and welcome."));
    assert!(!html.contains(r#"style="""#));

    let min = fs::read_to_string(config.paths.output.join("welcome.min.html")).unwrap();
    assert!(min.contains("Hello and welcome."));
    assert!(min.len() <= html.len());

    let lines: Vec<String> = summary.sizes.iter().map(output::format_size_line).collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("welcome.html: "));
    assert!(lines[1].starts_with("welcome.min.html: "));
    assert!(lines.iter().all(|l| l.ends_with(" Ko")));
    assert_eq!(pipeline.stage(), Stage::Verifying);
}

#[test]
fn conditional_comments_survive_the_whole_pipeline() {
    let tmp = TempDir::new().unwrap();
    let config = project(tmp.path());
    fs::write(config.paths.source.join("a.pug"), WELCOME).unwrap();
    let compiler = MrmlCompiler::new(&config.mjml);

    Pipeline::new(&config, &Passthrough, &compiler).build().unwrap();

    let html = fs::read_to_string(config.paths.output.join("a.html")).unwrap();
    let min = fs::read_to_string(config.paths.output.join("a.min.html")).unwrap();
    assert!(html.contains("<!--[if mso"));

    let comments = comments_of(&html);
    assert!(!comments.is_empty());
    for comment in comments {
        assert!(min.contains(comment), "lost in a.min.html: {comment}");
    }
}

/// Every `<!-- ... -->` span of `html`, in document order.
fn comments_of(html: &str) -> Vec<&str> {
    let mut comments = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find("<!--") {
        let Some(len) = rest[start..].find("-->") else {
            break;
        };
        let end = start + len + 3;
        comments.push(&rest[start..end]);
        rest = &rest[end..];
    }
    comments
}

#[test]
fn size_lines_report_actual_byte_lengths() {
    let tmp = TempDir::new().unwrap();
    let config = project(tmp.path());
    fs::write(config.paths.source.join("a.pug"), WELCOME).unwrap();
    let compiler = MrmlCompiler::new(&config.mjml);

    let summary = Pipeline::new(&config, &Passthrough, &compiler).build().unwrap();

    for name in ["a.html", "a.min.html"] {
        let bytes = fs::metadata(config.paths.output.join(name)).unwrap().len();
        let report = summary.sizes.iter().find(|r| r.name == name).unwrap();
        assert_eq!(report.bytes, bytes);
        assert_eq!(
            output::format_size_line(report),
            format!("{name}: {:.2} Ko", bytes as f64 / 1024.0)
        );
    }
}

#[test]
fn rebuild_after_clean_removes_stale_documents() {
    let tmp = TempDir::new().unwrap();
    let config = project(tmp.path());
    fs::write(config.paths.source.join("old.pug"), WELCOME).unwrap();
    let compiler = MrmlCompiler::new(&config.mjml);
    Pipeline::new(&config, &Passthrough, &compiler).build().unwrap();
    assert!(config.paths.output.join("old.min.html").exists());

    fs::remove_file(config.paths.source.join("old.pug")).unwrap();
    fs::write(config.paths.source.join("new.pug"), WELCOME).unwrap();
    Pipeline::new(&config, &Passthrough, &compiler).build().unwrap();

    assert!(!config.paths.output.join("old.html").exists());
    assert!(!config.paths.output.join("old.min.html").exists());
    assert!(config.paths.output.join("new.html").exists());
    assert!(config.paths.output.join("new.min.html").exists());
}

#[test]
fn invalid_markup_never_reaches_output() {
    let tmp = TempDir::new().unwrap();
    let config = project(tmp.path());
    fs::write(config.paths.source.join("good.pug"), WELCOME).unwrap();
    fs::write(config.paths.source.join("bad.pug"), "<mjml><mj-body>").unwrap();
    let compiler = MrmlCompiler::new(&config.mjml);

    let mut pipeline = Pipeline::new(&config, &Passthrough, &compiler);
    let err = pipeline.build().unwrap_err();

    assert!(matches!(err, PipelineError::Compile(_)));
    assert!(err.to_string().contains("bad.mjml"));
    assert!(!config.paths.output.join("bad.html").exists());
    assert!(!pipeline.transitions().contains(&Stage::Minifying));
}
