use std::io::Cursor;

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use camwatch::ingest::{CancellationToken, FrameDemuxer, MjpegStream, ProtocolError};
use camwatch::DecodedFrame;

const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=--camframe";

fn jpeg(width: u32, height: u32, shade: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([shade, 255 - shade, 128]));
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 85)
        .encode_image(&image)
        .expect("encode jpeg");
    out
}

fn multipart(payloads: &[Vec<u8>], crlf: bool) -> Vec<u8> {
    let nl: &[u8] = if crlf { b"\r\n" } else { b"\n" };
    let mut stream = Vec::new();
    for payload in payloads {
        stream.extend_from_slice(b"--camframe");
        stream.extend_from_slice(nl);
        stream.extend_from_slice(b"Content-Type: image/jpeg");
        stream.extend_from_slice(nl);
        stream.extend_from_slice(format!("Content-Length: {}", payload.len()).as_bytes());
        stream.extend_from_slice(nl);
        stream.extend_from_slice(nl);
        stream.extend_from_slice(payload);
        stream.extend_from_slice(nl);
    }
    stream.extend_from_slice(b"--camframe");
    stream.extend_from_slice(nl);
    stream
}

fn payloads_in_chunks(stream: &[u8], chunk: usize) -> Result<Vec<Vec<u8>>> {
    let mut demuxer = FrameDemuxer::new(b"--camframe".to_vec());
    let mut out = Vec::new();
    for piece in stream.chunks(chunk) {
        demuxer.feed_payloads(piece, |payload| {
            out.push(payload.to_vec());
            Ok(())
        })?;
    }
    Ok(out)
}

#[test]
fn chunk_size_does_not_change_emitted_frames() -> Result<()> {
    let frames = vec![jpeg(32, 24, 10), jpeg(48, 32, 90), jpeg(16, 16, 200)];
    for crlf in [true, false] {
        let stream = multipart(&frames, crlf);
        let whole = payloads_in_chunks(&stream, stream.len())?;
        assert_eq!(whole, frames);
        for chunk in [1, 2, 3, 7, 64, 1024] {
            assert_eq!(
                payloads_in_chunks(&stream, chunk)?,
                whole,
                "chunk size {}",
                chunk
            );
        }
    }
    Ok(())
}

#[test]
fn boundary_straddling_two_reads_is_found_once() -> Result<()> {
    let frames = vec![jpeg(8, 8, 1), jpeg(8, 8, 2)];
    let stream = multipart(&frames, true);
    let second_boundary = stream
        .windows(b"--camframe".len())
        .enumerate()
        .filter(|(_, window)| *window == b"--camframe")
        .nth(1)
        .map(|(i, _)| i)
        .expect("second boundary");

    let mut demuxer = FrameDemuxer::new(b"--camframe".to_vec());
    let mut out = Vec::new();
    let split = second_boundary + 4;
    for piece in [&stream[..split], &stream[split..]] {
        demuxer.feed_payloads(piece, |payload| {
            out.push(payload.to_vec());
            Ok(())
        })?;
    }
    assert_eq!(out, frames);
    assert_eq!(demuxer.stats().frames_received, 2);
    Ok(())
}

#[test]
fn corrupt_frame_is_dropped_and_next_frame_survives() -> Result<()> {
    let corrupt = b"\xFF\xD8 definitely not a jpeg".to_vec();
    let stream = multipart(&[jpeg(20, 10, 40), corrupt, jpeg(30, 12, 80)], true);

    let mut demuxer = FrameDemuxer::new(b"--camframe".to_vec());
    let mut sizes = Vec::new();
    for piece in stream.chunks(100) {
        demuxer.feed(piece, |frame: DecodedFrame| {
            sizes.push((frame.width(), frame.height()));
            Ok(())
        })?;
    }
    assert_eq!(sizes, vec![(20, 10), (30, 12)]);
    let stats = demuxer.stats();
    assert_eq!(stats.frames_received, 3);
    assert_eq!(stats.frames_dropped, 1);
    assert_eq!(stats.bytes_received, stream.len() as u64);
    Ok(())
}

#[test]
fn non_multipart_content_type_fails_before_reading() {
    let reader = Cursor::new(multipart(&[jpeg(8, 8, 0)], true));
    let err = match MjpegStream::new("image/jpeg", reader) {
        Ok(_) => panic!("expected protocol error"),
        Err(err) => err,
    };
    assert!(err.is::<ProtocolError>());
}

#[test]
fn stream_pumps_until_eof_and_discards_partial_tail() -> Result<()> {
    let mut bytes = multipart(&[jpeg(8, 8, 0), jpeg(8, 8, 50)], false);
    bytes.extend_from_slice(b"Content-Type: image/jpeg\n\n\xFF\xD8partial");
    let mut stream = MjpegStream::new(CONTENT_TYPE, Cursor::new(bytes))?;

    let mut count = 0;
    let mut sink = |_frame: DecodedFrame| -> Result<()> {
        count += 1;
        Ok(())
    };
    stream.pump(&CancellationToken::new(), &mut sink)?;
    assert_eq!(count, 2);
    assert_eq!(stream.stats().frames_received, 2);
    Ok(())
}

#[test]
fn cancelled_stream_emits_nothing() -> Result<()> {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut stream = MjpegStream::new(
        CONTENT_TYPE,
        Cursor::new(multipart(&[jpeg(8, 8, 0)], true)),
    )?;
    let mut count = 0;
    let mut sink = |_frame: DecodedFrame| -> Result<()> {
        count += 1;
        Ok(())
    };
    stream.pump(&cancel, &mut sink)?;
    assert_eq!(count, 0);
    Ok(())
}
