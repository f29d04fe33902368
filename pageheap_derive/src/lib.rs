extern crate quote;
extern crate syn;
extern crate synstructure;

use quote::{format_ident, quote};
use synstructure::{AddBounds, Structure, decl_derive};

decl_derive! {
    [MapKey] =>
    /// Derive the `MapKey` trait.
    derive_map_key
}

/// Derives the `MapKey` trait.
///
/// The hash folds the hashes of every field, seeded with the variant index so
/// that unit variants of an enum do not collide. Two values are equal keys if
/// they are the same variant and every pair of fields are equal keys.
#[allow(clippy::needless_pass_by_value)]
fn derive_map_key(mut s: Structure<'_>) -> proc_macro2::TokenStream {
    let mut variant_index = 0u64;
    let hash_body = s.each_variant(|variant| {
        let tag = variant_index;
        variant_index += 1;
        let fields = variant.bindings().iter().map(|bi| {
            quote! {
                __hash = ::pageheap::collections::map::combine_hash(
                    __hash,
                    ::pageheap::MapKey::key_hash(#bi),
                );
            }
        });
        quote! {
            #[allow(unused_mut)]
            let mut __hash = ::pageheap::collections::map::combine_hash(
                ::pageheap::collections::map::HASH_SEED,
                #tag,
            );
            #(#fields)*
            __hash
        }
    });

    let mut other = s.clone();
    other.binding_name(|_, i| format_ident!("__other_{}", i));
    let eq_arms = s.variants().iter().zip(other.variants()).map(|(ours, theirs)| {
        let our_pat = ours.pat();
        let their_pat = theirs.pat();
        let fields = ours
            .bindings()
            .iter()
            .zip(theirs.bindings())
            .map(|(a, b)| quote!(&& ::pageheap::MapKey::key_eq(#a, #b)));
        quote! {
            #our_pat => match *other {
                #their_pat => true #(#fields)*,
                #[allow(unreachable_patterns)]
                _ => false,
            },
        }
    }).collect::<Vec<_>>();

    s.add_bounds(AddBounds::Fields);
    s.bound_impl(
        quote!(::pageheap::MapKey),
        quote! {
            #[inline]
            fn key_hash(&self) -> u64 {
                match *self { #hash_body }
            }
            #[inline]
            fn key_eq(&self, other: &Self) -> bool {
                match *self { #(#eq_arms)* }
            }
        },
    )
}
