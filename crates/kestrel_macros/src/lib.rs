use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, FnArg, ItemFn, Pat};

/// Time a function when the `perf_stats` feature is enabled.
///
/// The body is wrapped in a drop guard that logs the elapsed time on exit.
/// Without the feature the guard is never compiled and the function is untouched.
///
/// # Budget detection
/// If the function takes a `budget: Duration` parameter (the per-step time budget of a
/// time-sliced build), the guard warns whenever a call overruns that budget by more than
/// the threshold instead of only logging slow calls.
///
/// # Example
/// ```ignore
/// #[profile(2)]  // log when a call takes longer than 2ms
/// pub fn step(&mut self, geometry: &dyn WorldGeometry, budget: Duration) -> bool { ... }
/// ```
#[proc_macro_attribute]
pub fn profile(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    let threshold_ms: u128 = if attr.is_empty() {
        1
    } else {
        attr.to_string().parse().unwrap_or(1)
    };

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let fn_name_str = sig.ident.to_string();

    let has_budget_param = sig.inputs.iter().any(|arg| {
        if let FnArg::Typed(pat_type) = arg {
            if let Pat::Ident(pat_ident) = &*pat_type.pat {
                if pat_ident.ident == "budget" {
                    let ty = &pat_type.ty;
                    let type_str = quote!(#ty).to_string();
                    return type_str.contains("Duration");
                }
            }
        }
        false
    });

    let profile_guard_def = if has_budget_param {
        quote! {
            struct ProfileGuard {
                name: &'static str,
                start: std::time::Instant,
                budget: std::time::Duration,
            }
            impl Drop for ProfileGuard {
                fn drop(&mut self) {
                    let elapsed = self.start.elapsed();
                    let overrun = elapsed.saturating_sub(self.budget);
                    if overrun.as_millis() > #threshold_ms {
                        bevy::prelude::warn!(
                            "[PERF] {}: {:?} (budget {:?}, overran by {:?})",
                            self.name, elapsed, self.budget, overrun
                        );
                    }
                }
            }
            ProfileGuard {
                name: #fn_name_str,
                start: std::time::Instant::now(),
                budget,
            }
        }
    } else {
        quote! {
            struct ProfileGuard {
                name: &'static str,
                start: std::time::Instant,
            }
            impl Drop for ProfileGuard {
                fn drop(&mut self) {
                    let elapsed = self.start.elapsed();
                    if elapsed.as_millis() > #threshold_ms {
                        bevy::prelude::info!("[PERF] {}: {:?}", self.name, elapsed);
                    }
                }
            }
            ProfileGuard {
                name: #fn_name_str,
                start: std::time::Instant::now(),
            }
        }
    };

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            #[cfg(feature = "perf_stats")]
            let _profile_timer = {
                #profile_guard_def
            };

            #block
        }
    };

    output.into()
}
