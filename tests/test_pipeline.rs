//! Integration tests for the capture pipeline.
//!
//! Tests cover:
//! - Deduplication and pricing of classified dishes
//! - Dishes missing from the menu
//! - Regions that cannot be cropped or classified
//! - Detector failures and the optional confidence floor
//! - Annotated output and debug dumps

mod common;

use std::sync::atomic::Ordering;

use common::*;

fn labels(items: &[ClassifiedItem]) -> Vec<&str> {
    items.iter().map(|i| i.label.as_str()).collect()
}

#[test]
fn test_duplicate_dish_billed_once() -> anyhow::Result<()> {
    let dishes = [dish(10, CANHCHUA), dish(70, CANHCHUA), dish(130, COM)];
    let frame = paint_tray(&dishes);
    let pipeline = make_pipeline(ScriptedDetector::new(regions_for(&dishes)), None);

    let output = pipeline.process(&frame, &test_menu())?;

    assert_eq!(labels(&output.items), ["CANHCHUA", "COM"]);
    assert_eq!(output.items[0].price, Some(15000));
    assert_eq!(output.items[1].price, Some(5000));
    assert_eq!(output.amount, 20000);
    Ok(())
}

#[test]
fn test_dish_missing_from_menu_is_shown_unpriced() -> anyhow::Result<()> {
    let dishes = [dish(10, GA_NUONG), dish(70, COM)];
    let frame = paint_tray(&dishes);
    let pipeline = make_pipeline(ScriptedDetector::new(regions_for(&dishes)), None);

    let output = pipeline.process(&frame, &test_menu())?;

    assert_eq!(
        output.items,
        vec![
            ClassifiedItem { label: "GA_NUONG".into(), price: None },
            ClassifiedItem { label: "COM".into(), price: Some(5000) },
        ]
    );
    assert_eq!(output.amount, 5000);
    Ok(())
}

#[test]
fn test_order_follows_first_appearance() -> anyhow::Result<()> {
    let dishes = [dish(10, COM), dish(70, CANHCHUA), dish(130, COM)];
    let frame = paint_tray(&dishes);
    let pipeline = make_pipeline(ScriptedDetector::new(regions_for(&dishes)), None);

    let output = pipeline.process(&frame, &test_menu())?;
    assert_eq!(labels(&output.items), ["COM", "CANHCHUA"]);
    Ok(())
}

#[test]
fn test_empty_tray_bills_nothing() -> anyhow::Result<()> {
    let frame = paint_tray(&[]);
    let pipeline = make_pipeline(ScriptedDetector::new(vec![]), None);

    let output = pipeline.process(&frame, &test_menu())?;
    assert!(output.items.is_empty());
    assert_eq!(output.amount, 0);
    assert_eq!(output.annotated, frame);
    Ok(())
}

#[test]
fn test_bad_regions_are_skipped() -> anyhow::Result<()> {
    let unreadable = Dish {
        bbox: BoundingBox::new(70, 20, 110, 60),
        color: UNREADABLE,
    };
    let outside = Dish {
        bbox: BoundingBox::new(500, 500, 540, 540),
        color: class_color(CANHCHUA, 0.9),
    };
    let unmapped = Dish {
        bbox: BoundingBox::new(180, 20, 220, 60),
        color: class_color(UNMAPPED, 0.9),
    };
    let dishes = [dish(10, COM), unreadable, outside, unmapped];
    let frame = paint_tray(&dishes);
    let pipeline = make_pipeline(ScriptedDetector::new(regions_for(&dishes)), None);

    let output = pipeline.process(&frame, &test_menu())?;

    assert_eq!(labels(&output.items), ["COM"]);
    assert_eq!(output.amount, 5000);
    Ok(())
}

#[test]
fn test_region_past_frame_edge_is_clamped() -> anyhow::Result<()> {
    let edge = Dish {
        bbox: BoundingBox::new(200, 20, 300, 60),
        color: class_color(CANHCHUA, 0.9),
    };
    let frame = paint_tray(std::slice::from_ref(&edge));
    let pipeline = make_pipeline(ScriptedDetector::new(regions_for(&[edge])), None);

    let output = pipeline.process(&frame, &test_menu())?;
    assert_eq!(labels(&output.items), ["CANHCHUA"]);
    Ok(())
}

#[test]
fn test_more_than_six_dishes_all_billed() -> anyhow::Result<()> {
    let menu = MenuCatalog::from_entries([
        ("A", 1000),
        ("B", 1000),
        ("C", 1000),
        ("D", 1000),
        ("E", 1000),
        ("F", 1000),
        ("G", 1000),
    ]);
    let names = ["A", "B", "C", "D", "E", "F", "G"];
    let dishes: Vec<Dish> = (0..7)
        .map(|i| Dish {
            bbox: BoundingBox::new(i as i32 * 30 + 5, 20, i as i32 * 30 + 30, 60),
            color: class_color(i, 0.9),
        })
        .collect();
    let frame = paint_tray(&dishes);
    let settings = traybill::PipelineSettings {
        labels: traybill::LabelMap::new(names),
        ..test_settings(None)
    };
    let pipeline = traybill::build_standard_pipeline(
        std::sync::Arc::new(ScriptedDetector::new(regions_for(&dishes))),
        std::sync::Arc::new(ColorClassifier),
        settings,
    );

    let output = pipeline.process(&frame, &menu)?;
    assert_eq!(output.items.len(), 7);
    assert_eq!(output.amount, 7000);
    Ok(())
}

#[test]
fn test_amount_overflow_fails_capture() {
    let menu = MenuCatalog::from_entries([("CANHCHUA", u64::MAX), ("COM", 1)]);
    let dishes = [dish(10, CANHCHUA), dish(70, COM)];
    let frame = paint_tray(&dishes);
    let pipeline = make_pipeline(ScriptedDetector::new(regions_for(&dishes)), None);

    let err = pipeline.process(&frame, &menu).unwrap_err();
    assert!(err.to_string().contains("overflows"));
}

#[test]
fn test_detector_error_fails_capture() {
    let pipeline = make_pipeline(ScriptedDetector::failing(), None);
    let err = pipeline.process(&paint_tray(&[]), &test_menu()).unwrap_err();
    assert!(err.to_string().contains("detector offline"));
}

#[test]
fn test_confidence_floor_drops_weak_classifications() -> anyhow::Result<()> {
    let weak = Dish {
        bbox: BoundingBox::new(70, 20, 110, 60),
        color: class_color(CANHCHUA, 0.3),
    };
    let dishes = [dish(10, COM), weak];
    let frame = paint_tray(&dishes);

    let open = make_pipeline(ScriptedDetector::new(regions_for(&dishes)), None);
    assert_eq!(open.process(&frame, &test_menu())?.items.len(), 2);

    let strict = make_pipeline(ScriptedDetector::new(regions_for(&dishes)), Some(0.5));
    let output = strict.process(&frame, &test_menu())?;
    assert_eq!(labels(&output.items), ["COM"]);
    assert_eq!(output.amount, 5000);
    Ok(())
}

#[test]
fn test_annotated_frame_has_boxes_for_every_region() -> anyhow::Result<()> {
    let unreadable = Dish {
        bbox: BoundingBox::new(70, 20, 110, 60),
        color: UNREADABLE,
    };
    let dishes = [dish(10, COM), unreadable];
    let frame = paint_tray(&dishes);
    let pipeline = make_pipeline(ScriptedDetector::new(regions_for(&dishes)), None);

    let output = pipeline.process(&frame, &test_menu())?;

    let green = image::Rgb([0, 255, 0]);
    // Boxes are drawn even for regions the classifier rejected.
    assert_eq!(*output.annotated.get_pixel(10, 20), green);
    assert_eq!(*output.annotated.get_pixel(70, 20), green);
    assert_eq!(*output.annotated.get_pixel(71, 21), green);
    // Interior and background untouched.
    assert_eq!(output.annotated.get_pixel(30, 40), frame.get_pixel(30, 40));
    assert_eq!(output.annotated.get_pixel(5, 5), frame.get_pixel(5, 5));
    Ok(())
}

#[test]
fn test_detector_runs_once_per_capture() -> anyhow::Result<()> {
    let detector = ScriptedDetector::new(vec![]);
    let calls = detector.calls();
    let pipeline = make_pipeline(detector, None);

    pipeline.process(&paint_tray(&[]), &test_menu())?;
    pipeline.process(&paint_tray(&[]), &test_menu())?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_debug_mode_writes_each_step() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let debug_dir = dir.path().join("debug");
    let dishes = [dish(10, COM)];
    let frame = paint_tray(&dishes);
    let pipeline =
        make_pipeline(ScriptedDetector::new(regions_for(&dishes)), None).with_debug(debug_dir.clone())?;

    pipeline.process(&frame, &test_menu())?;

    let capture = debug_dir.join("capture_0001");
    assert!(capture.join("00_input/frame.png").exists());
    assert!(capture.join("00_input/annotated.png").exists());
    assert!(capture.join("01_crop/01.png").exists());
    assert!(capture.join("04_label/01_COM.png").exists());
    Ok(())
}

#[test]
fn test_debug_dir_must_be_empty() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    std::fs::write(dir.path().join("leftover.txt"), "x")?;
    let result = make_pipeline(ScriptedDetector::new(vec![]), None).with_debug(dir.path().to_path_buf());
    assert!(result.is_err());
    Ok(())
}
