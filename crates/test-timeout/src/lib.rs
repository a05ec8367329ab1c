//! Test attributes that put a hard deadline on a test.
//!
//! `#[test_timeout::tokio_timeout_test]` runs an async test on a fresh
//! current-thread runtime; `#[test_timeout::timeout]` wraps a synchronous test.
//! Both accept an optional number of seconds (`#[test_timeout::timeout(5)]`).
//! Without one, `TEST_TIMEOUT_SECS` is consulted at run time before falling
//! back to 60 seconds.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, LitInt};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const TIMEOUT_ENV: &str = "TEST_TIMEOUT_SECS";

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let deadline = match parse_deadline(attr) {
        Ok(deadline) => deadline,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let attrs = strip_test_attrs(attrs);
    let run = quote! {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build Tokio runtime");
        runtime.block_on(async {
            tokio::time::timeout(timeout_duration, async move #block)
                .await
                .expect("test timed out");
        });
    };

    TokenStream::from(wrap(attrs, vis, sig, deadline, run))
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let deadline = match parse_deadline(attr) {
        Ok(deadline) => deadline,
        Err(err) => return err.to_compile_error().into(),
    };
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout expects a synchronous test function; use tokio_timeout_test for async tests",
        )
        .to_compile_error()
        .into();
    }

    let attrs = strip_test_attrs(attrs);
    let run = quote! { #block; };

    TokenStream::from(wrap(attrs, vis, sig, deadline, run))
}

/// Runs `run` on a helper thread and fails the test if it does not report back
/// before the deadline. Panics from the body are resumed on the test thread so
/// `#[should_panic]` keeps working.
fn wrap(
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    deadline: TokenStream2,
    run: TokenStream2,
) -> TokenStream2 {
    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let timeout_duration = #deadline;
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #run }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration) {
                Ok(Ok(())) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    }
}

/// Expands to a `Duration` expression. An explicit literal wins; otherwise the
/// environment override is read when the test runs.
fn parse_deadline(attr: TokenStream) -> syn::Result<TokenStream2> {
    if attr.is_empty() {
        return Ok(quote! {
            std::time::Duration::from_secs(
                std::env::var(#TIMEOUT_ENV)
                    .ok()
                    .and_then(|raw| raw.trim().parse::<u64>().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(#DEFAULT_TIMEOUT_SECS),
            )
        });
    }

    let lit: LitInt = syn::parse(attr)?;
    let secs: u64 = lit.base10_parse()?;
    if secs == 0 {
        return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
    }
    Ok(quote! { std::time::Duration::from_secs(#secs) })
}

/// Drops `#[test]` and `#[tokio::test]` so the test is not registered twice.
fn strip_test_attrs(attrs: Vec<Attribute>) -> Vec<Attribute> {
    attrs
        .into_iter()
        .filter(|attr| {
            let segments: Vec<String> = attr
                .path()
                .segments
                .iter()
                .map(|segment| segment.ident.to_string())
                .collect();
            !matches!(
                segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(),
                ["test"] | ["tokio", "test"]
            )
        })
        .collect()
}
