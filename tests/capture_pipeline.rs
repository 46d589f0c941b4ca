use anyhow::{anyhow, Result};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use detection_stream::detect::{InputLayout, InputSpec, StubEngine};
use detection_stream::server::{ServerConfig, StreamServer};
use detection_stream::{
    Annotator, CameraConfig, CameraSource, CaptureLoop, FrameBroadcaster, FrameSource,
    PipelineSettings,
};

fn read_part(reader: &mut BufReader<TcpStream>) -> Result<Vec<u8>> {
    let mut len = None;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(anyhow!("stream ended"));
        }
        if let Some(value) = line.trim_end().strip_prefix("Content-Length: ") {
            len = Some(value.parse::<usize>()?);
        }
        if line == "\r\n" && len.is_some() {
            break;
        }
    }
    let mut payload = vec![0u8; len.unwrap_or(0)];
    reader.read_exact(&mut payload)?;
    let mut trailer = [0u8; 2];
    reader.read_exact(&mut trailer)?;
    Ok(payload)
}

#[test]
fn synthetic_camera_streams_annotated_jpegs() -> Result<()> {
    let frames = Arc::new(FrameBroadcaster::new());
    let server = StreamServer::new(
        ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        },
        frames.clone(),
    )
    .spawn()?;

    let mut source = CameraSource::new(CameraConfig {
        device: "stub://test".to_string(),
        target_fps: 60,
        ..CameraConfig::default()
    })?;
    source.connect()?;
    let engine = StubEngine::new(InputSpec {
        width: 64,
        height: 64,
        layout: InputLayout::Nchw,
    });
    let mut pipeline = CaptureLoop::new(
        source,
        engine,
        Annotator::default(),
        PipelineSettings::default(),
        frames.clone(),
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let capture = {
        let shutdown = shutdown.clone();
        thread::spawn(move || pipeline.run(&shutdown))
    };

    let mut stream = TcpStream::connect(server.addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    stream.write_all(b"GET /stream.mjpg HTTP/1.1\r\nHost: localhost\r\n\r\n")?;
    let mut reader = BufReader::new(stream);

    for _ in 0..4 {
        let jpeg = read_part(&mut reader)?;
        assert_eq!(&jpeg[..2], &[0xff, 0xd8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xff, 0xd9]);
        let image = image::load_from_memory(&jpeg)?;
        assert_eq!((image.width(), image.height()), (320, 240));
    }

    shutdown.store(true, Ordering::SeqCst);
    let stats = capture
        .join()
        .map_err(|_| anyhow!("capture thread panicked"))??;
    assert!(stats.frames >= 4);
    assert_eq!(stats.inferences, stats.frames / 3);
    assert_eq!(stats.last_sequence, stats.frames);

    frames.close();
    server.stop()?;
    Ok(())
}

#[test]
fn unsupported_camera_device_is_an_error_without_v4l2() {
    let result = CameraSource::new(CameraConfig {
        device: "/dev/video0".to_string(),
        ..CameraConfig::default()
    });
    if cfg!(feature = "ingest-v4l2") {
        assert!(result.is_ok());
    } else {
        assert!(result.is_err());
    }
}
