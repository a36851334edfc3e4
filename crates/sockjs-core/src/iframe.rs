use sha2::{Digest, Sha256};

/// Render the iframe bootstrap page. The markup (including the two script
/// blocks and their order) is fixed by the SockJS protocol; only the
/// client library URL varies.
pub fn document(sockjs_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta http-equiv="X-UA-Compatible" content="IE=edge" />
  <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
  <script>
    document.domain = document.domain;
    _sockjs_onload = function(){{SockJS.bootstrap_iframe();}};
  </script>
  <script src="{sockjs_url}"></script>
</head>
<body>
  <h2>Don't panic!</h2>
  <p>This is a SockJS hidden iframe. It's used for cross domain magic.</p>
</body>
</html>"#
    )
}

/// Content hash of the iframe page, used as a strong ETag. Stable for a
/// fixed configuration.
pub fn etag(doc: &str) -> String {
    let digest = Sha256::digest(doc.as_bytes());
    let mut hex = String::with_capacity(2 + digest.len() * 2);
    hex.push('"');
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.push('"');
    hex
}

/// The HTMLFile transport's initial document: registers the parent-frame
/// callback and defines the `p()` hook later script chunks invoke. Padded
/// with spaces so browsers start incremental parsing.
pub fn htmlfile_header(callback: &str) -> String {
    let mut doc = format!(
        r#"<!doctype html>
<html><head>
  <meta http-equiv="X-UA-Compatible" content="IE=edge" />
  <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
</head><body><h2>Don't panic!</h2>
  <script>
    document.domain = document.domain;
    var c = parent.{callback};
    c.start();
    function p(d) {{c.message(d);}};
    window.onload = function() {{c.stop();}};
  </script>
"#
    );
    if doc.len() < 1024 {
        let pad = 1024 - doc.len();
        doc.extend(std::iter::repeat(' ').take(pad));
    }
    doc.push_str("\r\n\r\n");
    doc
}
