//! Test attributes that fail a hanging test instead of wedging the suite.
//!
//! ```ignore
//! #[test_timeout::tokio_timeout_test]
//! async fn connects() { ... }
//!
//! #[test_timeout::tokio_timeout_test(10, paused)]
//! async fn settles_after_window() { ... }
//!
//! #[test_timeout::timeout(5)]
//! fn parses() { ... }
//! ```
//!
//! `paused` starts the Tokio clock paused so timer-driven code advances
//! instantly; the calling crate needs tokio's `test-util` feature.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Attribute, Expr, ItemFn, Lit, Token, parse_macro_input};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

struct TimeoutArgs {
    secs: u64,
    paused: bool,
}

impl Parse for TimeoutArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = TimeoutArgs {
            secs: DEFAULT_TIMEOUT_SECS,
            paused: false,
        };
        let items = Punctuated::<Expr, Token![,]>::parse_terminated(input)?;
        for item in items {
            match &item {
                Expr::Lit(lit) => match &lit.lit {
                    Lit::Int(int) => {
                        let secs: u64 = int.base10_parse()?;
                        if secs == 0 {
                            return Err(syn::Error::new_spanned(
                                int,
                                "timeout must be greater than zero",
                            ));
                        }
                        args.secs = secs;
                    }
                    other => {
                        return Err(syn::Error::new_spanned(other, "expected timeout seconds"));
                    }
                },
                Expr::Path(path) if path.path.is_ident("paused") => args.paused = true,
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "expected timeout seconds or `paused`",
                    ));
                }
            }
        }
        Ok(args)
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as TimeoutArgs);
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

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_path(attr, &["tokio", "test"]))
        .collect();

    let secs = args.secs;
    let paused = if args.paused {
        quote! { .start_paused(true) }
    } else {
        TokenStream2::new()
    };

    let body = quote! {
        let __tt_runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            #paused
            .build()
            .expect("failed to build Tokio runtime");
        __tt_runtime.block_on(async {
            tokio::time::timeout(__tt_timeout_duration, async move #block)
                .await
                .expect("test timed out");
        });
    };

    wrap(attrs, vis, sig, secs, body).into()
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as TimeoutArgs);
    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }
    if args.paused {
        return syn::Error::new_spanned(&sig.ident, "`paused` only applies to async tests")
            .to_compile_error()
            .into();
    }

    let attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_path(attr, &["test"]))
        .collect();

    let body = quote! {
        let _ = &__tt_timeout_duration;
        #block
    };

    wrap(attrs, vis, sig, args.secs, body).into()
}

/// Runs `body` on a fresh thread and fails the test if it does not report
/// back within the deadline. Panics inside the body are re-raised.
fn wrap(
    attrs: Vec<Attribute>,
    vis: syn::Visibility,
    sig: syn::Signature,
    secs: u64,
    body: TokenStream2,
) -> TokenStream2 {
    quote! {
        #[test]
        #(#attrs)*
        #vis #sig {
            let __tt_timeout_duration = std::time::Duration::from_secs(#secs);
            let (__tt_sender, __tt_receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let __tt_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    #body
                }));
                let _ = __tt_sender.send(__tt_result);
            });
            match __tt_receiver.recv_timeout(__tt_timeout_duration) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    }
}

fn is_path(attr: &Attribute, expected: &[&str]) -> bool {
    let segments: Vec<_> = attr.path().segments.iter().collect();
    segments.len() == expected.len()
        && segments
            .iter()
            .zip(expected)
            .all(|(segment, name)| segment.ident == name)
}
