#![cfg(unix)]

use h265batch::{parse_time_marker, EncodeError, EncodeRequest, EncodeSettings, Encoder, FfmpegEncoder, Strategy};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

fn fake_encoder(dir: &Path, body: &str) -> FfmpegEncoder {
    let path = dir.join("ffmpeg");
    fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    FfmpegEncoder::new(path)
}

fn request<'a>(
    source: &'a Path,
    destination: &'a Path,
    settings: &'a EncodeSettings,
    timeout: Option<Duration>,
) -> EncodeRequest<'a> {
    EncodeRequest {
        source,
        destination,
        strategy: Strategy::Remux,
        settings,
        overwrite: true,
        timeout,
    }
}

fn paths(dir: &Path) -> (PathBuf, PathBuf) {
    let source = dir.join("in.mkv");
    fs::write(&source, b"source").unwrap();
    (source, dir.join("out.mp4"))
}

#[test]
fn streams_carriage_return_progress() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = fake_encoder(
        tmp.path(),
        r#"for last; do :; done
printf 'Input #0, matroska\n' >&2
printf 'frame=10 time=00:00:01.50 speed=1x\rframe=20 time=00:00:03.00 speed=1x\r' >&2
printf 'done' > "$last"
"#,
    );
    let (source, destination) = paths(tmp.path());
    let settings = EncodeSettings::default();

    let mut lines = Vec::new();
    encoder
        .encode(&request(&source, &destination, &settings, None), &mut |l| {
            lines.push(l.to_string())
        })
        .unwrap();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "Input #0, matroska");
    let times: Vec<f64> = lines.iter().filter_map(|l| parse_time_marker(l)).collect();
    assert_eq!(times, vec![1.5, 3.0]);
    assert_eq!(fs::read(&destination).unwrap(), b"done");
}

#[test]
fn arguments_reach_the_process() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = fake_encoder(tmp.path(), "echo \"$@\" >&2\n");
    let (source, destination) = paths(tmp.path());
    let settings = EncodeSettings::default();

    let mut lines = Vec::new();
    encoder
        .encode(&request(&source, &destination, &settings, None), &mut |l| {
            lines.push(l.to_string())
        })
        .unwrap();

    let expected = format!(
        "-i {} -c copy -y {}",
        source.display(),
        destination.display()
    );
    assert_eq!(lines, vec![expected]);
}

#[test]
fn nonzero_exit_is_reported_with_code() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = fake_encoder(
        tmp.path(),
        "printf 'Conversion failed!\\n' >&2\nexit 3\n",
    );
    let (source, destination) = paths(tmp.path());
    let settings = EncodeSettings::default();

    let mut lines = Vec::new();
    let err = encoder
        .encode(&request(&source, &destination, &settings, None), &mut |l| {
            lines.push(l.to_string())
        })
        .unwrap_err();

    assert!(matches!(err, EncodeError::Exited { code: Some(3) }));
    assert_eq!(lines, vec!["Conversion failed!"]);
}

#[test]
fn deadline_kills_a_hung_encoder() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = fake_encoder(tmp.path(), "printf 'Input #0\\n' >&2\nexec sleep 30\n");
    let (source, destination) = paths(tmp.path());
    let settings = EncodeSettings::default();

    let started = Instant::now();
    let err = encoder
        .encode(
            &request(&source, &destination, &settings, Some(Duration::from_millis(300))),
            &mut |_| {},
        )
        .unwrap_err();

    assert!(matches!(err, EncodeError::TimedOut(_)), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
}
