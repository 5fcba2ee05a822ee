//! Unit tests for core Henkan functionality.
//!
//! Tests individual components in isolation without full pipeline execution.

use henkan::batcher::{split_with_estimates, CapacityBatcher, PACKAGE_OVERHEAD_BYTES};
use henkan::device;
use henkan::error::{Error, Result};
use henkan::generator::PackagePlan;
use henkan::job::{CancelToken, ConversionJob, JobRegistry, Phase};
use henkan::naming::{render_template, sanitize_filename, validate_template, NameContext};
use henkan::prelude::*;
use henkan::reader::compare_page_paths;
use image::Rgb;
use std::cmp::Ordering;

mod common;
use common::{create_sized_image, setup_test_dirs};

#[test]
fn test_device_profile_lookup() {
    let profile = device::profile("kindle_paperwhite_5").unwrap();
    assert_eq!(profile.width, 1236);
    assert_eq!(profile.height, 1648);
    assert_eq!(profile.dpi, 300);

    assert!(device::profile("nonexistent_device").is_none());
    assert!(device::all_profiles().len() >= 6);
}

#[test]
fn test_device_resolve_dimensions() {
    assert_eq!(
        device::resolve_dimensions("kobo_clara_2e", None, None),
        (1072, 1448)
    );

    // Custom with explicit dimensions
    assert_eq!(
        device::resolve_dimensions("custom", Some(800), Some(1200)),
        (800, 1200)
    );

    // Custom without both dimensions falls back to the default
    assert_eq!(
        device::resolve_dimensions("custom", Some(800), None),
        device::DEFAULT_DIMENSIONS
    );

    // Unknown ids are lenient, not fatal
    assert_eq!(
        device::resolve_dimensions("kindle_from_the_future", None, None),
        device::DEFAULT_DIMENSIONS
    );
}

#[test]
fn test_naming_render_template() -> Result<()> {
    let ctx = NameContext {
        series: "One Piece".to_string(),
        title: "One Piece".to_string(),
        chapter: "12".to_string(),
        volume: "2".to_string(),
        index: 7,
    };

    assert_eq!(
        render_template("{series} - Chapter {index:03}", &ctx)?,
        "One Piece - Chapter 007"
    );
    assert_eq!(
        render_template("{title} v{volume} c{chapter}", &ctx)?,
        "One Piece v2 c12"
    );
    assert_eq!(render_template("{index}", &ctx)?, "7");
    Ok(())
}

#[test]
fn test_naming_rejects_unknown_placeholders() {
    let err = validate_template("{series} {publisher}").unwrap_err();
    assert!(err.to_string().contains("Unknown placeholder"));

    let err = validate_template("{Series}").unwrap_err();
    assert!(err.to_string().contains("Malformed placeholder"));

    // Rendering an invalid template fails the same way
    let ctx = NameContext::default();
    assert!(render_template("{bogus}", &ctx).is_err());
}

#[test]
fn test_naming_rejects_unbalanced_braces() {
    for template in ["{series", "series}", "{series} - {index", "{{series}"] {
        let err = validate_template(template).unwrap_err();
        assert!(
            err.to_string().contains("Malformed placeholder"),
            "'{}' should be rejected, got: {}",
            template,
            err
        );
    }
}

#[test]
fn test_sanitize_filename() {
    assert_eq!(sanitize_filename("My Series - Ch. 01"), "My Series - Ch. 01");
    assert_eq!(sanitize_filename("a/b\\c:d*e"), "abcde");
    assert_eq!(sanitize_filename("???"), "untitled");
    assert_eq!(sanitize_filename("  spaced  "), "spaced");
}

#[test]
fn test_split_respects_budget() {
    // One oversized page plus two small ones: the big page closes the first
    // batch, the small ones share the second.
    let estimates = vec![60_000, 500, 500];
    let ranges = split_with_estimates(&estimates, 100_000);
    assert_eq!(ranges, vec![0..1, 1..3]);
}

#[test]
fn test_split_singleton_over_budget() {
    // A single page larger than the whole budget still gets a batch.
    let ranges = split_with_estimates(&[1_000_000], 100);
    assert_eq!(ranges, vec![0..1]);

    let ranges = split_with_estimates(&[1_000_000, 1_000_000], 100);
    assert_eq!(ranges, vec![0..1, 1..2]);
}

#[test]
fn test_split_empty_and_concat_property() {
    assert!(split_with_estimates(&[], 100_000).is_empty());

    // Concatenating ranges always reproduces the full index space in order.
    let estimates: Vec<u64> = (0..50).map(|i| 10_000 + i * 321).collect();
    let ranges = split_with_estimates(&estimates, 80_000);
    let mut expected_start = 0;
    for range in &ranges {
        assert_eq!(range.start, expected_start);
        assert!(range.end > range.start);
        expected_start = range.end;
    }
    assert_eq!(expected_start, estimates.len());
}

#[test]
fn test_split_everything_fits_one_batch() {
    let budget = PACKAGE_OVERHEAD_BYTES + 10_000_000;
    let ranges = split_with_estimates(&[5_000; 100], budget);
    assert_eq!(ranges, vec![0..100]);
}

#[tokio::test]
async fn test_batcher_estimates_from_files() -> Result<()> {
    let dirs = setup_test_dirs("batcher_estimates").await;
    let page = dirs.source_dir.join("page_001.jpg");
    create_sized_image(&page, 400, 600, Rgb([40, 40, 40])).await?;

    let mut batcher = CapacityBatcher::new(200 * 1024 * 1024);
    let estimate = batcher.estimate_page_size(&page)?;
    assert!(estimate > 0);
    // Memoized: a second call must agree.
    assert_eq!(batcher.estimate_page_size(&page)?, estimate);

    let count = batcher.suggest_split_count(&[page.clone()])?;
    assert_eq!(count, 1);

    // A bigger source file never estimates smaller
    let big = dirs.source_dir.join("page_002.jpg");
    create_sized_image(&big, 1200, 1600, Rgb([40, 40, 40])).await?;
    assert!(batcher.estimate_page_size(&big)? > estimate);

    let total = batcher.estimate_output_size(&[page, big])?;
    assert!(total > PACKAGE_OVERHEAD_BYTES);
    Ok(())
}

#[test]
fn test_request_builder_validation() {
    // Missing inputs entirely
    let result = ConversionRequest::builder()
        .session_id("s")
        .metadata(PackageMetadata::default_with_title("T"))
        .output_dir(PathBuf::from("/tmp"))
        .inputs(Vec::<PathBuf>::new())
        .build();
    assert!(result.is_err());

    // Quality out of range
    let result = ConversionRequest::builder()
        .session_id("s")
        .inputs(vec![PathBuf::from("a.cbz")])
        .metadata(PackageMetadata::default_with_title("T"))
        .output_dir(PathBuf::from("/tmp"))
        .quality(0u8)
        .build();
    assert!(result.unwrap_err().to_string().contains("Quality"));

    // Merge order must be a permutation of the input indices
    let result = ConversionRequest::builder()
        .session_id("s")
        .inputs(vec![PathBuf::from("a.cbz"), PathBuf::from("b.cbz")])
        .merge_order(vec![0usize, 0usize])
        .metadata(PackageMetadata::default_with_title("T"))
        .output_dir(PathBuf::from("/tmp"))
        .build();
    assert!(result.unwrap_err().to_string().contains("merge order"));

    // Unknown placeholder in the naming template
    let result = ConversionRequest::builder()
        .session_id("s")
        .inputs(vec![PathBuf::from("a.cbz")])
        .metadata(PackageMetadata::default_with_title("T"))
        .output_dir(PathBuf::from("/tmp"))
        .naming_template("{publisher}")
        .build();
    assert!(result.is_err());
}

#[test]
fn test_request_ordered_inputs() -> Result<()> {
    let request = ConversionRequest::builder()
        .session_id("s")
        .inputs(vec![
            PathBuf::from("a.cbz"),
            PathBuf::from("b.cbz"),
            PathBuf::from("c.cbz"),
        ])
        .merge_order(vec![2usize, 0usize, 1usize])
        .metadata(PackageMetadata::default_with_title("T"))
        .output_dir(PathBuf::from("/tmp"))
        .build()?;

    let ordered = request.ordered_inputs();
    assert_eq!(
        ordered,
        vec![
            PathBuf::from("c.cbz"),
            PathBuf::from("a.cbz"),
            PathBuf::from("b.cbz"),
        ]
    );
    Ok(())
}

#[test]
fn test_phase_transitions() {
    assert!(Phase::Pending.can_transition(Phase::Extracting));
    assert!(Phase::Extracting.can_transition(Phase::Merging));
    assert!(Phase::Extracting.can_transition(Phase::Converting));
    assert!(Phase::Merging.can_transition(Phase::Converting));
    assert!(Phase::Converting.can_transition(Phase::Completed));
    assert!(Phase::Extracting.can_transition(Phase::Failed));

    // No going backwards, no skipping to done
    assert!(!Phase::Converting.can_transition(Phase::Extracting));
    assert!(!Phase::Pending.can_transition(Phase::Completed));
    assert!(!Phase::Completed.can_transition(Phase::Failed));
    assert!(!Phase::Failed.can_transition(Phase::Extracting));
}

#[test]
fn test_job_rejects_illegal_transition() {
    let mut job = ConversionJob::new("session");
    let err = job.advance(Phase::Completed).unwrap_err();
    assert!(matches!(err, Error::PhaseTransition(_, _)));
    assert_eq!(job.phase, Phase::Pending);
}

#[test]
fn test_job_progress_is_monotone() {
    let mut job = ConversionJob::new("session");
    job.set_progress(40.0);
    job.set_progress(20.0);
    assert_eq!(job.progress, 40.0);
    job.set_progress(250.0);
    assert_eq!(job.progress, 100.0);
}

#[test]
fn test_job_fail_does_not_resurrect_completed() {
    let mut job = ConversionJob::new("session");
    job.advance(Phase::Extracting).unwrap();
    job.advance(Phase::Converting).unwrap();
    job.complete(vec!["out.epub".to_string()]).unwrap();

    job.fail("too late");
    assert_eq!(job.phase, Phase::Completed);
    assert!(job.error.is_none());
}

#[test]
fn test_registry_lifecycle() {
    let registry = JobRegistry::new();
    let (id, _cancel) = registry.insert(ConversionJob::new("session-a"));
    registry.insert(ConversionJob::new("session-b"));

    assert!(registry.get(id).is_some());
    assert_eq!(registry.list().len(), 2);
    assert_eq!(registry.list_for_session("session-a").len(), 1);
    assert_eq!(registry.list_for_session("unknown").len(), 0);

    registry.update(id, |job| job.set_progress(12.0));
    assert_eq!(registry.get(id).unwrap().progress, 12.0);

    // Cancelling a live job succeeds; terminal jobs refuse
    assert!(registry.cancel(id));
    registry.update(id, |job| job.fail("cancelled"));
    assert!(!registry.cancel(id));
}

#[test]
fn test_registry_cleanup_prunes_only_old_terminal_jobs() {
    let registry = JobRegistry::new();
    let (finished, _) = registry.insert(ConversionJob::new("session-a"));
    let (running, _) = registry.insert(ConversionJob::new("session-a"));
    registry.update(finished, |job| job.fail("gave up"));

    // A generous age keeps the just-finished job around
    registry.cleanup(std::time::Duration::from_secs(3600));
    assert_eq!(registry.list().len(), 2);

    // A zero age prunes it; the running job is never pruned
    registry.cleanup(std::time::Duration::ZERO);
    assert!(registry.get(finished).is_none());
    assert!(registry.get(running).is_some());
}

#[test]
fn test_cancel_token_checkpoint() {
    let token = CancelToken::new();
    assert!(token.checkpoint().is_ok());
    let clone = token.clone();
    clone.cancel();
    assert!(matches!(token.checkpoint(), Err(Error::Cancelled)));
}

#[test]
fn test_package_plan_part_naming() {
    let single = PackagePlan::for_part("My Series - Chapter 001", "My Series", 1, 1);
    assert_eq!(single.filename_base, "My Series - Chapter 001");
    assert_eq!(single.title, "My Series");

    let part = PackagePlan::for_part("My Series - Chapter 001", "My Series", 2, 3);
    assert_eq!(part.filename_base, "My Series - Chapter 001_part02");
    assert_eq!(part.title, "My Series (Part 2/3)");
}

#[test]
fn test_output_format_deliverables() {
    assert!(OutputFormat::Epub.wants_epub());
    assert!(!OutputFormat::Epub.wants_mobi());
    assert!(OutputFormat::Mobi.wants_mobi());
    assert!(!OutputFormat::Mobi.wants_epub());
    assert!(OutputFormat::Both.wants_epub() && OutputFormat::Both.wants_mobi());
}

#[test]
fn test_page_path_natural_ordering() {
    let a = PathBuf::from("page_2.jpg");
    let b = PathBuf::from("page_10.jpg");
    assert_eq!(compare_page_paths(&a, &b), Ordering::Less);

    // No numbers falls back to lexicographic order
    let a = PathBuf::from("alpha.jpg");
    let b = PathBuf::from("beta.jpg");
    assert_eq!(compare_page_paths(&a, &b), Ordering::Less);
}

#[test]
fn test_metadata_display_title() {
    let mut metadata = PackageMetadata::default_with_title("Berserk");
    assert_eq!(metadata.display_title(), "Berserk");
    metadata.chapter = Some("364".to_string());
    assert_eq!(metadata.display_title(), "Berserk - Chapter 364");
}
