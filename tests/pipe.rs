use maniac_subprocess::{pipe, Command, ProcessError, Redirect};

#[tokio::test(flavor = "current_thread")]
async fn small_writes_and_single_byte_reads() {
    let (mut reader, mut writer) = pipe().unwrap();

    let write = async {
        for _ in 0..1000 {
            writer.write(b"hello").await.unwrap();
        }
    };
    let read = async {
        let mut data = Vec::new();
        for _ in 0..5 * 1000 {
            data.extend(reader.read(Some(1), true).await.unwrap());
        }
        data
    };

    let ((), data) = tokio::join!(write, read);
    assert_eq!(data.len(), 5 * 1000);
    assert!(data.starts_with(b"hello"));
    assert!(data.ends_with(b"hello"));
}

#[tokio::test(flavor = "current_thread")]
async fn big_write_read_in_blocks() {
    let (mut reader, mut writer) = pipe().unwrap();
    let mut big = vec![b'x'; 1024 * 962];
    big.extend_from_slice(b"END");

    let write = async {
        writer.write(&big).await.unwrap();
    };
    let read = async {
        let mut data = Vec::new();
        for _ in 0..big.len() / 4096 {
            data.extend(reader.read(Some(4096), true).await.unwrap());
        }
        data.extend(reader.read(Some(big.len() % 4096), true).await.unwrap());
        data
    };

    let ((), data) = tokio::join!(write, read);
    assert_eq!(data.len(), big.len());
    assert!(data.ends_with(b"END"));
}

#[tokio::test(flavor = "current_thread")]
async fn closing_writer_ends_greedy_read() {
    let (mut reader, mut writer) = pipe().unwrap();
    let big = vec![b'x'; 1024 * 50];

    let write = async {
        writer.write(&big).await.unwrap();
        writer.write(&big).await.unwrap();
        writer.write(b"END").await.unwrap();
        writer.close();
    };
    let read = async { reader.read_to_end().await.unwrap() };

    let ((), data) = tokio::join!(write, read);
    assert_eq!(data.len(), big.len() * 2 + 3);
    assert!(data.ends_with(b"END"));
    assert!(reader.is_closed());
}

#[tokio::test(flavor = "current_thread")]
async fn closing_reader_breaks_the_writer() {
    let (mut reader, mut writer) = pipe().unwrap();
    let big = vec![b'x'; 1024 * 5000];

    let write = async { writer.write(&big).await };
    let read = async {
        for _ in 0..250 {
            reader.read(Some(777), true).await.unwrap();
        }
        reader.close();
    };

    let (written, ()) = tokio::join!(write, read);
    assert!(matches!(written, Err(ProcessError::BrokenPipe)));
    assert!(writer.is_closed());
    assert!(matches!(
        writer.write(b"more").await,
        Err(ProcessError::PipeClosed)
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn readline_until_reader_closes() {
    let (mut reader, mut writer) = pipe().unwrap();

    let write = async {
        while writer.write(b"hello\n").await.is_ok() {}
    };
    let read = async {
        for _ in 0..23 {
            assert_eq!(reader.read_line(None).await.unwrap(), b"hello\n");
        }
        reader.close();
    };

    tokio::join!(write, read);
    assert!(writer.is_closed());
}

#[tokio::test(flavor = "current_thread")]
async fn readline_exact_eof() {
    let (mut reader, mut writer) = pipe().unwrap();

    let write = async {
        for _ in 0..10 {
            writer.write(b"hello\n").await.unwrap();
        }
        writer.close();
    };
    let read = async {
        for _ in 0..10 {
            assert_eq!(reader.read_line(None).await.unwrap(), b"hello\n");
        }
        assert!(reader.read_line(None).await.unwrap().is_empty());
        assert!(reader.read_line(None).await.unwrap().is_empty());
    };

    tokio::join!(write, read);
}

#[tokio::test(flavor = "current_thread")]
async fn readline_returns_trailing_fragment_once() {
    let (mut reader, mut writer) = pipe().unwrap();
    // Enough lines to span many read chunks.
    let count = 64 * 1034 / 5 * 3;

    let write = async {
        for _ in 0..count {
            writer.write(b"hello\n").await.unwrap();
        }
        writer.write(b"this line never finish...").await.unwrap();
        writer.close();
    };
    let read = async {
        for _ in 0..count {
            assert_eq!(reader.read_line(None).await.unwrap(), b"hello\n");
        }
        assert_eq!(
            reader.read_line(None).await.unwrap(),
            b"this line never finish..."
        );
        assert!(reader.read_line(None).await.unwrap().is_empty());
        assert!(reader.read_line(None).await.unwrap().is_empty());
    };

    tokio::join!(write, read);
}

#[tokio::test(flavor = "current_thread")]
async fn readline_instant_eof() {
    let (mut reader, mut writer) = pipe().unwrap();
    writer.close();
    assert!(reader.read_line(None).await.unwrap().is_empty());
    assert!(reader.read_line(None).await.unwrap().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn readline_with_size_cap() {
    let (mut reader, mut writer) = pipe().unwrap();
    let mut bigline = Vec::new();
    for byte in [b'x', b'a', b'b', b'y'] {
        bigline.extend(std::iter::repeat(byte).take(256));
    }
    bigline.push(b'\n');

    let write = async {
        for _ in 0..1024 {
            writer.write(&bigline).await.unwrap();
        }
        writer.write(b"this line never finish...").await.unwrap();
        writer.close();
    };
    let read = async {
        for _ in 0..1024 {
            assert_eq!(reader.read_line(Some(512)).await.unwrap(), &bigline[..512]);
            assert_eq!(reader.read_line(Some(513)).await.unwrap(), &bigline[512..]);
        }
        assert_eq!(reader.read_line(Some(5)).await.unwrap(), b"this ");
        assert_eq!(
            reader.read_line(Some(19)).await.unwrap(),
            b"line never finish.."
        );
        assert_eq!(reader.read_line(Some(1)).await.unwrap(), b".");
        assert!(reader.read_line(None).await.unwrap().is_empty());
        assert!(reader.read_line(Some(0)).await.unwrap().is_empty());
        assert!(reader.read_line(Some(1)).await.unwrap().is_empty());
    };

    tokio::join!(write, read);
}

#[tokio::test(flavor = "current_thread")]
async fn readline_size_zero_then_one() {
    let (mut reader, mut writer) = pipe().unwrap();

    let write = async {
        while writer.write(b"hello\n").await.is_ok() {}
    };
    let read = async {
        assert!(reader.read_line(Some(0)).await.unwrap().is_empty());
        assert_eq!(reader.read_line(Some(1)).await.unwrap(), b"h");
        assert_eq!(reader.read_line(None).await.unwrap(), b"ello\n");
        reader.close();
    };

    tokio::join!(write, read);
}

#[tokio::test(flavor = "current_thread")]
async fn talking_with_sh() {
    let mut child = Command::new("sh")
        .stdin(Redirect::Pipe)
        .stdout(Redirect::Pipe)
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = child.stdout.take().unwrap();

    stdin.write(b"echo hello\n").await.unwrap();
    assert_eq!(stdout.read_line(None).await.unwrap(), b"hello\n");

    stdin.write_lines([&b"ls -l /\n"[..], &b"echo STOP_LS\n"[..]]).await.unwrap();
    loop {
        let line = stdout.read_line(None).await.unwrap();
        assert!(!line.is_empty(), "shell exited before STOP_LS");
        if line == b"STOP_LS\n" {
            break;
        }
    }

    stdin.write(b"exit 42\n").await.unwrap();
    assert!(stdout.read_to_end().await.unwrap().is_empty());
    let status = child.wait().await.unwrap();
    assert_eq!(status.returncode(), 42);
    assert_eq!(status.code(), Some(42));
}
