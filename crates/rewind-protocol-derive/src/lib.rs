//! `Encode`/`Decode` derives for `rewind-protocol`.
//!
//! Structs encode their fields in declaration order. Enums are tagged: the variant's
//! declaration index is written as a VarInt, followed by the variant's fields.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{Data, DeriveInput, Fields, parse_macro_input};

#[proc_macro_derive(Encode)]
pub fn derive_encode(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let encode_body = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => {
                let field_encodes = fields.named.iter().map(|f| {
                    let field_name = &f.ident;
                    quote! {
                        rewind_protocol::Encode::encode(&self.#field_name, writer)?;
                    }
                });
                quote! {
                    #(#field_encodes)*
                    Ok(())
                }
            }
            Fields::Unnamed(fields) => {
                let field_encodes = (0..fields.unnamed.len()).map(|i| {
                    let index = syn::Index::from(i);
                    quote! {
                        rewind_protocol::Encode::encode(&self.#index, writer)?;
                    }
                });
                quote! {
                    #(#field_encodes)*
                    Ok(())
                }
            }
            Fields::Unit => {
                quote! { Ok(()) }
            }
        },
        Data::Enum(data) => {
            let arms = data.variants.iter().enumerate().map(|(tag, variant)| {
                let variant_name = &variant.ident;
                let tag = tag as i32;
                let (pattern, encodes) = destructure(&variant.fields);
                quote! {
                    Self::#variant_name #pattern => {
                        rewind_protocol::write_varint(writer, #tag)?;
                        #encodes
                    }
                }
            });
            quote! {
                match self {
                    #(#arms)*
                }
                Ok(())
            }
        }
        Data::Union(_) => {
            quote! {
                compile_error!("Encode derive does not support unions")
            }
        }
    };

    let expanded = quote! {
        impl #impl_generics rewind_protocol::Encode for #name #ty_generics #where_clause {
            fn encode<W: std::io::Write>(&self, writer: &mut W) -> rewind_protocol::Result<()> {
                #encode_body
            }
        }
    };

    TokenStream::from(expanded)
}

/// Binding pattern for a variant plus the statements encoding each bound field.
fn destructure(fields: &Fields) -> (TokenStream2, TokenStream2) {
    match fields {
        Fields::Named(fields) => {
            let names: Vec<_> = fields.named.iter().map(|f| &f.ident).collect();
            let pattern = quote! { { #(#names),* } };
            let encodes = quote! {
                #(rewind_protocol::Encode::encode(#names, writer)?;)*
            };
            (pattern, encodes)
        }
        Fields::Unnamed(fields) => {
            let names: Vec<_> = (0..fields.unnamed.len())
                .map(|i| format_ident!("field_{}", i))
                .collect();
            let pattern = quote! { ( #(#names),* ) };
            let encodes = quote! {
                #(rewind_protocol::Encode::encode(#names, writer)?;)*
            };
            (pattern, encodes)
        }
        Fields::Unit => (quote! {}, quote! {}),
    }
}

/// Expression constructing `path` by decoding each field in order.
fn construct(path: &TokenStream2, fields: &Fields) -> TokenStream2 {
    match fields {
        Fields::Named(fields) => {
            let field_decodes = fields.named.iter().map(|f| {
                let field_name = &f.ident;
                let field_ty = &f.ty;
                quote! {
                    #field_name: <#field_ty as rewind_protocol::Decode>::decode(reader)?,
                }
            });
            quote! {
                #path {
                    #(#field_decodes)*
                }
            }
        }
        Fields::Unnamed(fields) => {
            let field_decodes = fields.unnamed.iter().map(|f| {
                let field_ty = &f.ty;
                quote! {
                    <#field_ty as rewind_protocol::Decode>::decode(reader)?,
                }
            });
            quote! {
                #path(#(#field_decodes)*)
            }
        }
        Fields::Unit => quote! { #path },
    }
}

#[proc_macro_derive(Decode)]
pub fn derive_decode(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;
    let generics = &input.generics;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let decode_body = match &input.data {
        Data::Struct(data) => {
            let value = construct(&quote! { Self }, &data.fields);
            quote! { Ok(#value) }
        }
        Data::Enum(data) => {
            let arms = data.variants.iter().enumerate().map(|(tag, variant)| {
                let variant_name = &variant.ident;
                let tag = tag as i32;
                let value = construct(&quote! { Self::#variant_name }, &variant.fields);
                quote! {
                    #tag => Ok(#value),
                }
            });
            quote! {
                match rewind_protocol::read_varint(reader)? {
                    #(#arms)*
                    other => Err(rewind_protocol::ProtocolError::InvalidEnumVariant(other)),
                }
            }
        }
        Data::Union(_) => {
            quote! {
                compile_error!("Decode derive does not support unions")
            }
        }
    };

    let expanded = quote! {
        impl #impl_generics rewind_protocol::Decode for #name #ty_generics #where_clause {
            fn decode<R: std::io::Read>(reader: &mut R) -> rewind_protocol::Result<Self> {
                #decode_body
            }
        }
    };

    TokenStream::from(expanded)
}
