#![cfg(unix)]

use std::fs::{self, File};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use veil_packer::config::{PathsConfig, PipelineConfig, SigningConfig, ToolchainConfig};
use veil_packer::crypto::{decrypt_payload, PayloadKey};
use veil_packer::{PackError, Pipeline, Stage};
use zip::write::FileOptions;

/// Stands in for `java -jar apktool.jar`: `d` lays out a decoded tree, `b`
/// records what ended up under res/raw and emits a minimal APK.
const FAKE_JAVA: &str = r#"#!/bin/sh
shift 2
mode="$1"; src="$2"; out="$4"
case "$mode" in
  d)
    [ -n "$FAIL_DECODE" ] && { echo "brut.androlib.AndrolibException: bad input" >&2; exit 1; }
    mkdir -p "$out/res/values"
    echo "decoded" > "$out/apktool.yml"
    ;;
  b)
    ls "$src/res/raw" > "$RAW_LISTING"
    cp "$src/res/raw/"* "$RAW_COPY"
    cp "$TEMPLATE_APK" "$out"
    ;;
esac
"#;

const FAKE_JARSIGNER: &str = r#"#!/bin/sh
printf '%s\n' "$@" > "$SIGN_ARGS"
env | grep '^VEIL_STOREPASS=' > "$SIGN_ENV"
while [ $# -gt 0 ]; do
  case "$1" in
    -signedjar) out="$2"; apk="$3"; shift 3 ;;
    *) shift ;;
  esac
done
cp "$apk" "$out"
"#;

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fixture = Fixture { dir };

        fixture.script("java", FAKE_JAVA);
        fixture.script("jarsigner", FAKE_JARSIGNER);
        fs::write(fixture.path("apktool_2.7.0.jar"), b"").unwrap();
        fs::write(fixture.path("release.jks"), b"keystore").unwrap();
        write_apk(&fixture.path("template.apk"), &["AndroidManifest.xml", "META-INF/CERT.SF", "META-INF/CERT.RSA"]);
        write_apk(&fixture.path("input.apk"), &["AndroidManifest.xml", "classes.dex"]);

        std::env::set_var("TEMPLATE_APK", fixture.path("template.apk"));
        std::env::set_var("RAW_LISTING", fixture.path("raw_listing.txt"));
        std::env::set_var("RAW_COPY", fixture.path("raw_copy.bin"));
        std::env::set_var("SIGN_ARGS", fixture.path("sign_args.txt"));
        std::env::set_var("SIGN_ENV", fixture.path("sign_env.txt"));
        fixture
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn script(&self, name: &str, body: &str) {
        let path = self.path(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            toolchain: ToolchainConfig {
                java: self.path("java"),
                apktool_jar: self.path("apktool_2.7.0.jar"),
                jarsigner: self.path("jarsigner"),
            },
            signing: SigningConfig {
                keystore: self.path("release.jks"),
                alias: "release".to_string(),
                store_password: "s3cret".to_string(),
                key_password: None,
            },
            paths: PathsConfig {
                work_dir: self.path("work"),
                keys_dir: self.path("keys"),
                base_apk: None,
            },
        }
    }
}

fn write_apk(path: &Path, names: &[&str]) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for name in names {
        zip.start_file(*name, FileOptions::default()).unwrap();
        zip.write_all(name.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

// One test drives every scenario: the fake tools read process-wide env vars.
#[test]
fn pipeline_against_fake_toolchain() {
    let fx = Fixture::new();
    let pipeline = Pipeline::new(fx.config()).unwrap();

    let mut stages = Vec::new();
    let artifact = pipeline
        .run(&fx.path("input.apk"), |stage| stages.push(stage))
        .unwrap();

    assert_eq!(
        stages,
        vec![Stage::Encrypting, Stage::Embedding, Stage::Signing, Stage::Done]
    );
    assert!(artifact.signed_apk.is_file());
    assert!(artifact
        .signed_apk
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("signed_veil_"));

    // The payload resource is the input APK sealed under the persisted key.
    let listing = fs::read_to_string(fx.path("raw_listing.txt")).unwrap();
    assert_eq!(listing.trim(), "input");
    let key = PayloadKey::load(&artifact.key_file).unwrap();
    let sealed = fs::read(fx.path("raw_copy.bin")).unwrap();
    assert_eq!(
        decrypt_payload(&key, &sealed).unwrap(),
        fs::read(fx.path("input.apk")).unwrap()
    );

    // The store password travels through the environment only.
    let sign_args = fs::read_to_string(fx.path("sign_args.txt")).unwrap();
    assert!(sign_args.contains("-storepass:env\nVEIL_STOREPASS"));
    assert!(!sign_args.contains("s3cret"));
    assert!(sign_args.contains("release"));
    let sign_env = fs::read_to_string(fx.path("sign_env.txt")).unwrap();
    assert_eq!(sign_env.trim(), "VEIL_STOREPASS=s3cret");

    // Decoded tree is gone even before cleanup; cleanup takes the rest.
    let workspace = artifact.workspace().to_path_buf();
    assert!(!fs::read_dir(&workspace)
        .unwrap()
        .any(|e| e.unwrap().file_name().to_string_lossy().starts_with("decoded_")));
    let key_file = artifact.key_file.clone();
    artifact.cleanup();
    assert!(!workspace.exists());
    assert!(key_file.exists());

    // A decode failure surfaces apktool's stderr and leaves nothing behind.
    std::env::set_var("FAIL_DECODE", "1");
    let err = pipeline.run(&fx.path("input.apk"), |_| {}).unwrap_err();
    std::env::remove_var("FAIL_DECODE");
    match &err {
        PackError::ToolFailed {
            tool, stderr_tail, ..
        } => {
            assert_eq!(tool, "apktool");
            assert_eq!(
                stderr_tail.last().map(String::as_str),
                Some("brut.androlib.AndrolibException: bad input")
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fs::read_dir(fx.path("work")).unwrap().count(), 0);

    // A missing keystore is caught before jarsigner runs.
    let mut config = fx.config();
    config.signing.keystore = fx.path("absent.jks");
    let err = Pipeline::new(config)
        .unwrap()
        .run(&fx.path("input.apk"), |_| {})
        .unwrap_err();
    assert!(matches!(err, PackError::NotFound(ref p) if p.ends_with("absent.jks")));

    // Failed runs leave no key behind; only the delivered run's key remains.
    let keys: Vec<PathBuf> = fs::read_dir(fx.path("keys"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(keys, vec![key_file.clone()]);

    // A configured base APK receives the payload instead of the input.
    let mut config = fx.config();
    config.paths.base_apk = Some(fx.path("template.apk"));
    let artifact = Pipeline::new(config)
        .unwrap()
        .run(&fx.path("input.apk"), |_| {})
        .unwrap();
    let dest = fx.path("out/protected.apk");
    let written = artifact.persist_to(&dest).unwrap();
    assert!(written.is_file());
}
