use std::fs;
use std::process::Command;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::TempDir;
use coversearch::{StoreLock, StorePaths};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use predicates::prelude::*;
use rstest::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[fixture]
fn conf_dir() -> TempDir {
    TempDir::new().unwrap()
}

fn album_json(file_name: &str, id: &str, position: Option<usize>) -> serde_json::Value {
    serde_json::json!({
        "file_name": file_name,
        "id": id,
        "name": "Album",
        "release_date": "2001-01-01",
        "total_tracks": 10,
        "artist": ["Artist"],
        "spotify_url": "https://open.spotify.com/album/x",
        "faiss_index": position,
    })
}

#[test]
fn help() -> Result<()> {
    cargo_run!("coversearch", "--help")
        .success()
        .stdout(predicate::str::contains("search"));
    Ok(())
}

#[rstest]
fn show_empty(conf_dir: TempDir) -> Result<()> {
    cargo_run!("coversearch", "-c", conf_dir.path(), "show")
        .success()
        .stdout(predicate::str::contains("专辑数量: 0"));
    Ok(())
}

#[rstest]
fn show_dangling_reference(conf_dir: TempDir) -> Result<()> {
    let records = serde_json::json!([album_json("a.jpg", "a", Some(9))]);
    fs::write(conf_dir.path().join("metadata.json"), records.to_string())?;

    cargo_run!("coversearch", "-c", conf_dir.path(), "show")
        .failure()
        .stderr(predicate::str::contains("元数据与索引不一致"));
    Ok(())
}

#[rstest]
fn repair_empty(conf_dir: TempDir) -> Result<()> {
    cargo_run!("coversearch", "-c", conf_dir.path(), "repair").success();
    Ok(())
}

#[rstest]
fn search_without_model(conf_dir: TempDir) -> Result<()> {
    let image = conf_dir.path().join("query.png");
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 0, 0])))
        .save_with_format(&image, ImageFormat::Png)?;

    cargo_run!("coversearch", "-c", conf_dir.path(), "search", &image)
        .failure()
        .stderr(predicate::str::contains("模型文件不存在"));
    Ok(())
}

#[rstest]
fn add_without_model_keeps_store_untouched(conf_dir: TempDir) -> Result<()> {
    let catalog = conf_dir.path().join("catalog.json");
    fs::write(&catalog, serde_json::json!([album_json("a.jpg", "a", None)]).to_string())?;

    cargo_run!("coversearch", "-c", conf_dir.path(), "add", &catalog).failure();
    assert!(!conf_dir.path().join("metadata.json").exists());
    assert!(!conf_dir.path().join("index.bin").exists());
    Ok(())
}

#[rstest]
fn add_bad_catalog(conf_dir: TempDir) -> Result<()> {
    let catalog = conf_dir.path().join("catalog.json");
    fs::write(&catalog, "{ not json")?;

    cargo_run!("coversearch", "-c", conf_dir.path(), "add", &catalog)
        .failure()
        .stderr(predicate::str::contains("无法解析专辑目录"));
    Ok(())
}

#[rstest]
fn writers_exclude_each_other(conf_dir: TempDir) -> Result<()> {
    let catalog = conf_dir.path().join("catalog.json");
    fs::write(&catalog, serde_json::json!([album_json("a.jpg", "a", None)]).to_string())?;
    let paths = StorePaths {
        index: conf_dir.path().join("index.bin"),
        metadata: conf_dir.path().join("metadata.json"),
    };
    let lock = StoreLock::acquire(&paths)?;

    cargo_run!("coversearch", "-c", conf_dir.path(), "add", &catalog)
        .failure()
        .stderr(predicate::str::contains("数据目录正被其他进程使用"));
    cargo_run!("coversearch", "-c", conf_dir.path(), "repair")
        .failure()
        .stderr(predicate::str::contains("数据目录正被其他进程使用"));

    drop(lock);
    cargo_run!("coversearch", "-c", conf_dir.path(), "repair").success();
    Ok(())
}
