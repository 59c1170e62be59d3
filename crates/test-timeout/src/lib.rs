//! `#[tokio_timeout_test]`: runs an async test on a current-thread tokio
//! runtime inside a wall-clock timeout, optionally with the tokio clock
//! paused so timer-driven code can be stepped deterministically.
//!
//! ```ignore
//! #[test_timeout::tokio_timeout_test]
//! async fn default_sixty_seconds() {}
//!
//! #[test_timeout::tokio_timeout_test(10, paused)]
//! async fn paused_clock() {
//!     tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
//! }
//! ```

use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, Attribute, Ident, ItemFn, LitInt, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

struct TestOptions {
    timeout_secs: u64,
    paused: bool,
}

impl Parse for TestOptions {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut options = TestOptions {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            paused: false,
        };

        while !input.is_empty() {
            if input.peek(LitInt) {
                let lit: LitInt = input.parse()?;
                let secs: u64 = lit.base10_parse()?;
                if secs == 0 {
                    return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
                }
                options.timeout_secs = secs;
            } else {
                let ident: Ident = input.parse()?;
                if ident != "paused" {
                    return Err(syn::Error::new_spanned(
                        ident,
                        "expected a timeout in seconds or `paused`",
                    ));
                }
                options.paused = true;
            }

            if input.is_empty() {
                break;
            }
            input.parse::<Token![,]>()?;
        }

        Ok(options)
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let options = parse_macro_input!(attr as TestOptions);

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

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let timeout = options.timeout_secs;
    // A paused clock auto-advances, so a tokio timeout would measure virtual
    // time; only the wall-clock guard on the runner thread applies then.
    let run_body = if options.paused {
        quote! {
            tokio::time::pause();
            async move #block.await;
        }
    } else {
        quote! {
            tokio::time::timeout(timeout_duration, async move #block)
                .await
                .expect("test timed out");
        }
    };

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            let timeout_duration = std::time::Duration::from_secs(#timeout);
            let (sender, receiver) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    let runtime = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .expect("failed to build Tokio runtime");
                    runtime.block_on(async {
                        #run_body
                    });
                }));
                let _ = sender.send(result);
            });
            match receiver.recv_timeout(timeout_duration + std::time::Duration::from_secs(1)) {
                Ok(Ok(_)) => {}
                Ok(Err(payload)) => std::panic::resume_unwind(payload),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    panic!("test thread failed before reporting result")
                }
            }
        }
    })
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}
